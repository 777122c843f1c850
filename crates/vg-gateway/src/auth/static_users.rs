//! File-backed credential gate
//!
//! Users are stored in a TOML file as a random salt, an iteration count and
//! the PBKDF2-HMAC-SHA256 key derived from the password, hex encoded:
//!
//! ```toml
//! [users.bob]
//! salt = "9f2c..."
//! iterations = 600000
//! hash = "41d0..."
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use vg_core::error::AuthError;
use vg_core::traits::{AuthOutcome, CredentialGate};

use super::AUTH_FAILURE_REASON;

/// Length of the random salt in bytes (before hex encoding)
const SALT_BYTES: usize = 16;

/// PBKDF2 rounds for newly hashed passwords
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Length of the derived key in bytes
const KEY_BYTES: usize = 32;

/// One user's stored credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Hex-encoded salt
    pub salt: String,
    /// PBKDF2 rounds used to derive `hash`
    pub iterations: u32,
    /// Hex-encoded PBKDF2-HMAC-SHA256 key
    pub hash: String,
}

impl UserEntry {
    /// Check a password against this entry
    pub fn verify(&self, password: &str) -> bool {
        let (Ok(salt), Ok(stored)) = (hex::decode(&self.salt), hex::decode(&self.hash)) else {
            return false;
        };
        if self.iterations == 0 || stored.len() != KEY_BYTES {
            return false;
        }
        let derived = derive_key(&salt, self.iterations, password);
        derived.as_slice().ct_eq(stored.as_slice()).into()
    }
}

/// Contents of a users file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersFile {
    /// Entries by login name
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
}

impl UsersFile {
    /// Parse a users file
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let users_file_error = |reason: String| AuthError::UsersFile {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| users_file_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| users_file_error(e.to_string()))
    }

    /// Write the users file, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let users_file_error = |reason: String| AuthError::UsersFile {
            path: path.to_path_buf(),
            reason,
        };
        let content = toml::to_string_pretty(self).map_err(|e| users_file_error(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| users_file_error(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| users_file_error(e.to_string()))?;
        }
        Ok(())
    }

    /// Add or replace a user
    pub fn insert(&mut self, username: impl Into<String>, entry: UserEntry) {
        self.users.insert(username.into(), entry);
    }
}

/// Hash a password with a fresh random salt and [`PBKDF2_ITERATIONS`] rounds
pub fn hash_password(password: &str) -> UserEntry {
    hash_password_with(password, PBKDF2_ITERATIONS)
}

/// Hash a password with a fresh random salt and the given number of rounds
pub fn hash_password_with(password: &str, iterations: u32) -> UserEntry {
    use rand::Rng;
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill(&mut salt);
    UserEntry {
        salt: hex::encode(salt),
        iterations,
        hash: hex::encode(derive_key(&salt, iterations, password)),
    }
}

fn derive_key(salt: &[u8], iterations: u32, password: &str) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Credential gate backed by a [`UsersFile`]
pub struct StaticCredentialGate {
    users: UsersFile,
}

impl StaticCredentialGate {
    /// Create a gate over an in-memory users table
    pub fn new(users: UsersFile) -> Self {
        Self { users }
    }

    /// Load the users file at `path`
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let users = UsersFile::load(path)?;
        debug!(count = users.users.len(), ?path, "loaded users file");
        Ok(Self::new(users))
    }
}

#[async_trait]
impl CredentialGate for StaticCredentialGate {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome, AuthError> {
        let granted = self
            .users
            .users
            .get(username)
            .map(|entry| entry.verify(password))
            .unwrap_or(false);

        if granted {
            Ok(AuthOutcome::Granted)
        } else {
            Ok(AuthOutcome::denied(AUTH_FAILURE_REASON))
        }
    }
}
