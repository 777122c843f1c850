//! Viewer-facing handshake
//!
//! Phase 1 runs on the plaintext socket and ends once the viewer has
//! selected VeNCrypt X509Plain. The socket is then upgraded to TLS and
//! phase 2 reads the credential frame over the encrypted channel.
//!
//! Each phase feeds its transport into a fresh [`ByteStreamReader`] via
//! [`drive`], so every read below suspends until its bytes have arrived
//! and fails as soon as the viewer goes away.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tracing::{debug, warn};

use vg_core::traits::{AuthOutcome, CredentialGate};
use vg_core::GatewayError;
use vg_protocol::{
    drive, AuthResult, ByteStreamReader, CredentialFrame, ProtocolError, ProtocolVersion,
    SECURITY_TYPE_VENCRYPT, SERVER_BANNER, VENCRYPT_VERSION, VENCRYPT_X509_PLAIN, VERSION_LEN,
};

use crate::connection::{ConnectionContext, TlsState};
use crate::tls::TlsUpgrader;

/// VeNCrypt acknowledgement sent right before the TLS handshake
const UPGRADE_ACK: u8 = 1;

/// Result of the credential exchange
#[derive(Debug)]
pub enum ClientAuth {
    /// Credentials accepted; the success code is still owed to the viewer
    Authenticated {
        /// Authenticated login name
        username: String,
        /// Bytes the viewer sent after its credentials
        leftover: Bytes,
    },
    /// Credentials rejected; the failure frame has been sent and the
    /// connection shut down
    Rejected {
        /// Reason given by the credential backend
        reason: String,
    },
}

async fn send<W>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Phase 1: version and security negotiation on the plaintext socket
///
/// On success the viewer has selected X509Plain and is waiting for the
/// upgrade acknowledgement. Any bytes it sent beyond its selection are a
/// protocol violation.
pub async fn negotiate_security<S>(
    stream: &mut S,
    ctx: &mut ConnectionContext,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reader = ByteStreamReader::new();
    let (mut source, mut sink) = tokio::io::split(&mut *stream);

    drive(&mut source, &reader, phase_one(&mut sink, &reader, ctx)).await?;

    let unread = reader.drain_unread();
    if !unread.is_empty() {
        return Err(ProtocolError::UnexpectedData(unread.len()));
    }
    Ok(())
}

async fn phase_one<W>(
    sink: &mut W,
    reader: &ByteStreamReader,
    ctx: &mut ConnectionContext,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    send(sink, SERVER_BANNER).await?;

    let banner = reader.read_exact(VERSION_LEN).await?;
    let version = ProtocolVersion::parse(&banner)?;
    ctx.version = Some(version);
    debug!(%version, "viewer protocol version");

    if version.negotiates_security_list() {
        send(sink, &[1, SECURITY_TYPE_VENCRYPT]).await?;
        let selected = reader.read_u8().await?;
        if selected != SECURITY_TYPE_VENCRYPT {
            return Err(ProtocolError::UnsupportedSecurityType(u32::from(selected)));
        }
    } else {
        send(sink, &u32::from(SECURITY_TYPE_VENCRYPT).to_be_bytes()).await?;
    }

    let (major, minor) = VENCRYPT_VERSION;
    send(sink, &[major, minor]).await?;
    let requested = (reader.read_u8().await?, reader.read_u8().await?);
    if requested != VENCRYPT_VERSION {
        send(sink, &[1]).await?;
        return Err(ProtocolError::ExtensionVersionMismatch {
            major: requested.0,
            minor: requested.1,
        });
    }

    let mut offer = BytesMut::with_capacity(6);
    offer.put_u8(0);
    offer.put_u8(1);
    offer.put_u32(VENCRYPT_X509_PLAIN);
    send(sink, &offer).await?;

    let subtype = reader.read_u32_be().await?;
    if subtype != VENCRYPT_X509_PLAIN {
        send(sink, &[0]).await?;
        return Err(ProtocolError::UnsupportedSubtype(subtype));
    }
    ctx.subtype = Some(subtype);
    Ok(())
}

/// Acknowledge the subtype and run the TLS handshake on the same socket
pub async fn upgrade<S>(
    mut stream: S,
    tls: &TlsUpgrader,
    ctx: &mut ConnectionContext,
) -> Result<TlsStream<S>, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send(&mut stream, &[UPGRADE_ACK]).await?;
    let upgraded = tls.accept(stream).await?;
    ctx.tls = TlsState::Complete;
    debug!("TLS upgrade complete");
    Ok(upgraded)
}

/// Phase 2: read the credential frame and consult the credential gate
///
/// A rejection is answered with the failure code, plus the reason for
/// RFB 3.8 viewers, and the stream is shut down. A success is not
/// answered here: the success code is sent once the backend is ready.
pub async fn authenticate<S>(
    stream: &mut S,
    ctx: &mut ConnectionContext,
    gate: &dyn CredentialGate,
) -> Result<ClientAuth, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reader = ByteStreamReader::new();
    let (username, outcome) = drive(&mut *stream, &reader, async {
        let frame = CredentialFrame::read_from(&reader).await?;
        let outcome = gate.authenticate(&frame.username, &frame.password).await?;
        Ok::<_, GatewayError>((frame.username, outcome))
    })
    .await?;

    match outcome {
        AuthOutcome::Granted => {
            ctx.username = Some(username.clone());
            Ok(ClientAuth::Authenticated {
                username,
                leftover: reader.drain_unread(),
            })
        }
        AuthOutcome::Denied { reason } => {
            warn!(%username, %reason, "authentication failed");
            let frame = AuthResult::failed(reason.clone()).to_bytes(ctx.version_or_default());
            send(stream, &frame).await?;
            let _ = stream.shutdown().await;
            Ok(ClientAuth::Rejected { reason })
        }
    }
}
