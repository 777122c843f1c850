//! Backend-facing handshake
//!
//! The gateway connects to the user's display server as an ordinary RFB
//! client, echoes whatever accepted version the server announces, and
//! selects security type None. The backend link is a trusted local
//! transport.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use vg_core::error::BackendError;
use vg_protocol::{
    drive, AuthResult, ByteStreamReader, ProtocolError, ProtocolVersion, SECURITY_TYPE_NONE,
    VERSION_LEN,
};

/// A backend that has finished its handshake
#[derive(Debug)]
pub struct BackendReady {
    /// Version the backend announced and we echoed
    pub version: ProtocolVersion,
    /// Bytes the backend sent past the end of its handshake
    pub leftover: Bytes,
}

/// Negotiate with a freshly connected backend
pub async fn negotiate<S>(stream: &mut S) -> Result<BackendReady, BackendError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reader = ByteStreamReader::new();
    let version = {
        let (mut source, mut sink) = tokio::io::split(&mut *stream);
        drive(&mut source, &reader, exchange(&mut sink, &reader)).await?
    };
    debug!(%version, "backend ready");

    Ok(BackendReady {
        version,
        leftover: reader.drain_unread(),
    })
}

async fn exchange<W>(
    sink: &mut W,
    reader: &ByteStreamReader,
) -> Result<ProtocolVersion, ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let banner = reader.read_exact(VERSION_LEN).await?;
    let version = ProtocolVersion::parse(&banner)?;
    sink.write_all(&banner).await?;
    sink.flush().await?;

    if version.negotiates_security_list() {
        let count = reader.read_u8().await?;
        let offered = reader.read_exact(usize::from(count)).await?;
        if !offered.contains(&SECURITY_TYPE_NONE) {
            return Err(ProtocolError::NoSecurityOffered(offered.to_vec()));
        }
        sink.write_all(&[SECURITY_TYPE_NONE]).await?;
        sink.flush().await?;
    } else {
        let dictated = reader.read_u32_be().await?;
        if dictated != u32::from(SECURITY_TYPE_NONE) {
            return Err(ProtocolError::UnsupportedSecurityType(dictated));
        }
    }

    if version.sends_failure_reason() {
        let (code, result) = AuthResult::read_from(reader, version).await?;
        if let AuthResult::Failed { reason } = result {
            return Err(ProtocolError::SecurityRejected { code, reason });
        }
    }

    Ok(version)
}
