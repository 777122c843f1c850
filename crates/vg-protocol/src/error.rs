//! Protocol error types

use thiserror::Error;

/// Errors raised while driving an RFB handshake
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The stream ended before a read could be satisfied
    #[error("Stream ended{}", reason_suffix(.0))]
    StreamEnded(Option<String>),

    /// Peer announced a protocol version outside the accepted set
    #[error("Unsupported RFB version: {0:?}")]
    UnsupportedVersion(String),

    /// Peer selected or offered a security type we do not speak
    #[error("Unsupported security type: {0}")]
    UnsupportedSecurityType(u32),

    /// Peer offered a list of security types without the one we need
    #[error("No acceptable security type offered: {0:?}")]
    NoSecurityOffered(Vec<u8>),

    /// VeNCrypt version mismatch
    #[error("Unsupported VeNCrypt version {major}.{minor}")]
    ExtensionVersionMismatch { major: u8, minor: u8 },

    /// VeNCrypt subtype mismatch
    #[error("Unsupported VeNCrypt subtype: {0}")]
    UnsupportedSubtype(u32),

    /// Remote side reported a failed security result
    #[error("Security result {code}: {reason}")]
    SecurityRejected { code: u32, reason: String },

    /// Bytes arrived where the protocol requires the peer to wait
    #[error("Unexpected {0} bytes before the transport upgrade")]
    UnexpectedData(usize),

    /// A length-prefixed field announced more bytes than we accept
    #[error("{field} length {len} exceeds maximum of {max} bytes")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A text field was not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidText(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an I/O error kind means the peer closed or dropped the connection
pub fn is_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
    )
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": {}", r),
        None => String::new(),
    }
}

impl ProtocolError {
    /// Whether this error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::StreamEnded(_) => true,
            ProtocolError::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }
}
