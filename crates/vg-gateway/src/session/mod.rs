//! Per-user display sessions

mod registry;
mod xvnc;

pub use registry::{LiveSession, SessionRegistry};
pub use xvnc::{XvncSession, XvncSessionBroker};
