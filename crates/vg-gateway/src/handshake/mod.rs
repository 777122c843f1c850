//! RFB handshakes
//!
//! `client` plays the server role toward a connecting viewer (plaintext
//! negotiation, VeNCrypt upgrade, credential check). `backend` plays the
//! client role toward a per-user display server using security type None.

pub mod backend;
pub mod client;

pub use backend::BackendReady;
pub use client::ClientAuth;
