//! PAM credential gate
//!
//! libpam is blocking, so every conversation runs on the blocking pool.

use async_trait::async_trait;

use vg_core::error::AuthError;
use vg_core::traits::{AuthOutcome, CredentialGate};

/// Authenticates against a PAM service
pub struct PamCredentialGate {
    service: String,
}

impl PamCredentialGate {
    /// Create a gate for `service` (e.g. `vnc`, read from `/etc/pam.d/vnc`)
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// The PAM service name
    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl CredentialGate for PamCredentialGate {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        let service = self.service.clone();
        let username = username.to_string();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || {
            let mut authenticator = ::pam::Authenticator::with_password(&service)
                .map_err(|e| AuthError::Backend(format!("PAM init for {}: {}", service, e)))?;
            authenticator
                .get_handler()
                .set_credentials(username.as_str(), password.as_str());

            match authenticator.authenticate() {
                Ok(()) => Ok(AuthOutcome::Granted),
                Err(e) => Ok(AuthOutcome::denied(e.to_string())),
            }
        })
        .await
        .map_err(|e| AuthError::Backend(format!("PAM worker failed: {}", e)))?
    }
}
