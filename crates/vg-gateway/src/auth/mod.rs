//! Credential backends

#[cfg(feature = "pam")]
mod pam;
mod static_users;

#[cfg(feature = "pam")]
pub use self::pam::PamCredentialGate;
pub use static_users::{
    hash_password, hash_password_with, StaticCredentialGate, UserEntry, UsersFile,
    PBKDF2_ITERATIONS,
};

use std::sync::Arc;

use vg_core::config::{AuthBackend, AuthConfig};
use vg_core::error::AuthError;
use vg_core::traits::CredentialGate;

/// Reason reported to viewers for rejected credentials
pub const AUTH_FAILURE_REASON: &str = "Authentication failure";

/// Build the credential gate selected in the configuration
pub fn build_gate(config: &AuthConfig) -> Result<Arc<dyn CredentialGate>, AuthError> {
    match config.backend {
        AuthBackend::Pam => pam_gate(&config.pam_service),
        AuthBackend::Static => {
            let path = config.users_file.as_ref().ok_or_else(|| {
                AuthError::Unavailable("static (auth.users_file is not set)".to_string())
            })?;
            Ok(Arc::new(StaticCredentialGate::load(path)?))
        }
    }
}

#[cfg(feature = "pam")]
fn pam_gate(service: &str) -> Result<Arc<dyn CredentialGate>, AuthError> {
    Ok(Arc::new(PamCredentialGate::new(service)))
}

#[cfg(not(feature = "pam"))]
fn pam_gate(_service: &str) -> Result<Arc<dyn CredentialGate>, AuthError> {
    Err(AuthError::Unavailable("pam".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_backend_requires_users_file() {
        let config = AuthConfig {
            backend: AuthBackend::Static,
            pam_service: "vnc".to_string(),
            users_file: None,
        };
        assert!(matches!(
            build_gate(&config),
            Err(AuthError::Unavailable(_))
        ));
    }

    #[test]
    fn test_static_backend_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        let mut users = UsersFile::default();
        users.insert("bob", hash_password_with("secret", 16));
        users.save(&path).unwrap();

        let config = AuthConfig {
            backend: AuthBackend::Static,
            pam_service: "vnc".to_string(),
            users_file: Some(path),
        };
        assert!(build_gate(&config).is_ok());
    }

    #[cfg(not(feature = "pam"))]
    #[test]
    fn test_pam_unavailable_without_feature() {
        let config = AuthConfig::default();
        assert!(matches!(
            build_gate(&config),
            Err(AuthError::Unavailable(name)) if name == "pam"
        ));
    }
}
