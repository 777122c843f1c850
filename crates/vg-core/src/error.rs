//! Core error types for vnc-gate

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vg_protocol::error::is_disconnect_kind;
use vg_protocol::ProtocolError;

/// Top-level error for a single gateway connection
///
/// Every variant is fatal to the connection it occurred on and to nothing
/// else.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Viewer broke the protocol or went away mid-handshake
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Credential backend failed (not an ordinary rejection)
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Backend session could not be resolved, reached, or negotiated with
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// TLS upgrade failed
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Handshake did not finish in time
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether the viewer simply went away (logged as a disconnect, not a fault)
    pub fn is_disconnect(&self) -> bool {
        match self {
            GatewayError::Protocol(e) => e.is_disconnect(),
            GatewayError::Io(e) => is_disconnect_kind(e.kind()),
            _ => false,
        }
    }
}

/// Credential backend errors
///
/// A wrong password is not an error; it is reported as a denied outcome.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The backend itself failed
    #[error("Credential backend failure: {0}")]
    Backend(String),

    /// Users file could not be loaded
    #[error("Failed to load users file {path}: {reason}")]
    UsersFile { path: PathBuf, reason: String },

    /// The requested backend is not compiled in
    #[error("Credential backend '{0}' is not available in this build")]
    Unavailable(String),
}

/// Backend session errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// Username cannot be used to start a session
    #[error("Invalid username for a display session: {0:?}")]
    InvalidUsername(String),

    /// A backend process could not be spawned
    #[error("Failed to spawn {what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Display server exited before it started listening
    #[error("Display server for {username} exited before it was ready ({status})")]
    ExitedBeforeReady { username: String, status: String },

    /// Display server did not start listening in time
    #[error("Display server for {username} not ready after {timeout:?}")]
    StartTimeout { username: String, timeout: Duration },

    /// Could not connect to the backend endpoint
    #[error("Failed to connect to backend {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend broke the protocol or closed during its handshake
    #[error("Backend handshake failed: {0}")]
    Handshake(#[from] ProtocolError),
}

/// TLS-specific errors
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate from file
    #[error("Failed to load certificate from {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },

    /// Failed to load private key from file
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKeyLoad { path: PathBuf, reason: String },

    /// TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl TlsError {
    /// Create a certificate load error
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a private key load error
    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(reason: impl Into<String>) -> Self {
        TlsError::Handshake(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        TlsError::Config(reason.into())
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
