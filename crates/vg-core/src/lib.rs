//! vg-core: Core abstractions and configuration for vnc-gate
//!
//! This crate provides the configuration structures, the error taxonomy,
//! and the contracts of the two collaborators the protocol engine relies
//! on: the credential gate and the backend session broker.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::GatewayError;
pub use types::{BackendEndpoint, Username};
