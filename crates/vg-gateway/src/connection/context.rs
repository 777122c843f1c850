//! Connection context
//!
//! Created when a viewer is accepted and threaded explicitly through
//! phase 1, the TLS upgrade and phase 2. Nothing here is attached to the
//! transport itself.

use std::net::SocketAddr;

use vg_protocol::ProtocolVersion;

/// Progress of the in-band TLS upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    /// Still on the plaintext socket
    Pending,
    /// TLS handshake finished
    Complete,
}

/// What is known about one viewer connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Connection number, for log correlation
    pub id: u64,
    /// Viewer address
    pub peer: SocketAddr,
    /// Version the viewer asked for
    pub version: Option<ProtocolVersion>,
    /// VeNCrypt subtype the viewer selected
    pub subtype: Option<u32>,
    /// TLS upgrade progress
    pub tls: TlsState,
    /// Set once the viewer has authenticated
    pub username: Option<String>,
}

impl ConnectionContext {
    /// Create the context for a freshly accepted connection
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            version: None,
            subtype: None,
            tls: TlsState::Pending,
            username: None,
        }
    }

    /// Negotiated version, falling back to 3.8 before negotiation
    pub fn version_or_default(&self) -> ProtocolVersion {
        self.version.unwrap_or(ProtocolVersion::V3_8)
    }
}
