//! vg-gateway: TLS-terminating RFB gateway
//!
//! Viewers connect in plaintext, negotiate VeNCrypt X509Plain, upgrade the
//! same socket to TLS and authenticate with a username and password. The
//! gateway then starts (or reuses) that user's Xvnc session and relays
//! bytes between the two until either side goes away.

pub mod auth;
pub mod bootstrap;
pub mod bridge;
pub mod connection;
pub mod handshake;
pub mod server;
pub mod session;
pub mod state;
pub mod tls;

pub use server::{ConnectionHandler, GatewayServer};
pub use state::GatewayState;
pub use tls::TlsUpgrader;
