//! Collaborator contracts used by the protocol engine

mod broker;
mod credentials;

pub use broker::SessionBroker;
pub use credentials::{AuthOutcome, CredentialGate};
