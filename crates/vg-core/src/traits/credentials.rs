//! Credential verification contract

use async_trait::async_trait;

use crate::error::AuthError;

/// Result of checking a username/password pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials are valid
    Granted,
    /// Credentials were rejected; `reason` is shown to RFB 3.8 viewers
    Denied { reason: String },
}

impl AuthOutcome {
    /// Create a denied outcome
    pub fn denied(reason: impl Into<String>) -> Self {
        AuthOutcome::Denied {
            reason: reason.into(),
        }
    }
}

/// Verifies system credentials
///
/// Ordinary invalid credentials must come back as [`AuthOutcome::Denied`].
/// `Err` is reserved for failures of the backend itself and aborts the
/// connection without a security result.
#[async_trait]
pub trait CredentialGate: Send + Sync {
    /// Check a username/password pair
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, AuthError>;
}
