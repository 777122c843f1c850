//! vg-protocol: RFB handshake primitives for vnc-gate
//!
//! This crate holds the byte-level pieces shared by both handshake roles:
//! the buffered stream reader the handshakes suspend on, the accepted
//! protocol versions, and the VeNCrypt credential and result frames.

pub mod error;
pub mod reader;
pub mod security;
pub mod version;

pub use error::ProtocolError;
pub use reader::{drive, ByteStreamReader};
pub use security::{
    AuthResult, CredentialFrame, SECURITY_TYPE_NONE, SECURITY_TYPE_VENCRYPT, VENCRYPT_VERSION,
    VENCRYPT_X509_PLAIN,
};
pub use version::{ProtocolVersion, SERVER_BANNER, VERSION_LEN};
