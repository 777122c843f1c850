//! Security negotiation constants and frames
//!
//! The gateway offers a single security type to viewers: VeNCrypt (19),
//! version 0.2, subtype X509Plain (262). After the TLS upgrade the viewer
//! sends a credential frame:
//!
//! - username_length: 4 bytes (u32, big-endian)
//! - password_length: 4 bytes (u32, big-endian)
//! - username: `username_length` bytes (UTF-8)
//! - password: `password_length` bytes (UTF-8)
//!
//! and receives a security result: a 4-byte big-endian code, followed on
//! failure (RFB 3.8 only) by a 4-byte length and a reason string.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::reader::ByteStreamReader;
use crate::version::ProtocolVersion;

/// Security type "None"
pub const SECURITY_TYPE_NONE: u8 = 1;

/// Security type "VeNCrypt" (TLS upgrade extension)
pub const SECURITY_TYPE_VENCRYPT: u8 = 19;

/// VeNCrypt version spoken by the gateway (major, minor)
pub const VENCRYPT_VERSION: (u8, u8) = (0, 2);

/// VeNCrypt subtype: X.509 server certificate, plaintext credentials
pub const VENCRYPT_X509_PLAIN: u32 = 262;

/// Largest username, password, or reason we are willing to buffer
pub const MAX_TEXT_FIELD_LEN: usize = 64 * 1024;

/// Security result code for success
const RESULT_OK: u32 = 0;

/// Security result code for failure
const RESULT_FAILED: u32 = 1;

/// Read a u32 length prefix and the text it announces
async fn read_text_field(
    reader: &ByteStreamReader,
    len: u32,
    field: &'static str,
) -> Result<String, ProtocolError> {
    let len = len as usize;
    if len > MAX_TEXT_FIELD_LEN {
        return Err(ProtocolError::FieldTooLong {
            field,
            len,
            max: MAX_TEXT_FIELD_LEN,
        });
    }
    reader.read_string(len, field).await
}

/// Plaintext credentials sent by the viewer inside the TLS session
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialFrame {
    /// Login name
    pub username: String,
    /// Password, never logged
    pub password: String,
}

impl CredentialFrame {
    /// Create a credential frame
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Encode the frame into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(8 + self.username.len() + self.password.len());
        dst.put_u32(self.username.len() as u32);
        dst.put_u32(self.password.len() as u32);
        dst.put_slice(self.username.as_bytes());
        dst.put_slice(self.password.as_bytes());
    }

    /// Encode the frame into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Read a frame, suspending until all of it has arrived
    pub async fn read_from(reader: &ByteStreamReader) -> Result<Self, ProtocolError> {
        let username_len = reader.read_u32_be().await?;
        let password_len = reader.read_u32_be().await?;
        let username = read_text_field(reader, username_len, "username").await?;
        let password = read_text_field(reader, password_len, "password").await?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for CredentialFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialFrame")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Outcome of a security handshake as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Security handshake succeeded
    Ok,
    /// Security handshake failed
    Failed {
        /// Human-readable reason (only transmitted to RFB 3.8 peers)
        reason: String,
    },
}

impl AuthResult {
    /// Create a failed result
    pub fn failed(reason: impl Into<String>) -> Self {
        AuthResult::Failed {
            reason: reason.into(),
        }
    }

    /// The 4-byte result code
    pub fn code(&self) -> u32 {
        match self {
            AuthResult::Ok => RESULT_OK,
            AuthResult::Failed { .. } => RESULT_FAILED,
        }
    }

    /// Encode the result as sent to a peer speaking `version`
    ///
    /// The reason frame is only emitted for failures on RFB 3.8; older
    /// versions receive the bare code.
    pub fn encode(&self, version: ProtocolVersion, dst: &mut BytesMut) {
        dst.put_u32(self.code());
        if let AuthResult::Failed { reason } = self {
            if version.sends_failure_reason() {
                dst.put_u32(reason.len() as u32);
                dst.put_slice(reason.as_bytes());
            }
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, version: ProtocolVersion) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        self.encode(version, &mut buf);
        buf.freeze()
    }

    /// Read a result sent by a peer speaking `version`
    ///
    /// Any nonzero code is a failure. On RFB 3.8 a failure is followed by a
    /// reason string, on older versions the reason is left empty.
    pub async fn read_from(
        reader: &ByteStreamReader,
        version: ProtocolVersion,
    ) -> Result<(u32, Self), ProtocolError> {
        let code = reader.read_u32_be().await?;
        if code == RESULT_OK {
            return Ok((code, AuthResult::Ok));
        }
        let reason = if version.sends_failure_reason() {
            let len = reader.read_u32_be().await?;
            read_text_field(reader, len, "reason").await?
        } else {
            String::new()
        };
        Ok((code, AuthResult::Failed { reason }))
    }
}
