//! Backend session broker contract

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::BackendEndpoint;

/// Maps an authenticated user to a running display session
///
/// Implementations may start backend processes as a side effect. Calling
/// `resolve` repeatedly for the same user must reuse the running session,
/// and concurrent calls for one user must not start more than one.
#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Resolve (starting if needed) the display session for `username`,
    /// returning once it is accepting connections
    async fn resolve(&self, username: &str) -> Result<BackendEndpoint, BackendError>;
}
