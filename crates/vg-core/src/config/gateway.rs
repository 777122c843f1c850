//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the gateway daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address viewers connect to
    pub bind_address: String,

    /// Deadline for phase 1, the TLS upgrade and phase 2 together (0 disables)
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Maximum number of concurrent viewer connections
    pub max_connections: Option<u32>,

    /// Server certificate and key
    pub tls: TlsConfig,

    /// Credential backend
    pub auth: AuthConfig,

    /// Display session backend
    pub backend: BackendConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5900".to_string(),
            handshake_timeout: Duration::from_secs(30),
            max_connections: None,
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The handshake deadline, if one is enforced
    pub fn handshake_deadline(&self) -> Option<Duration> {
        (!self.handshake_timeout.is_zero()).then_some(self.handshake_timeout)
    }

    /// Apply `RFB_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `RFB_*` overrides using `lookup` to read variables
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("RFB_HOST").filter(|v| !v.is_empty());
        let port = match lookup("RFB_PORT").filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("RFB_PORT is not a valid port: {:?}", raw))
            })?),
            None => None,
        };
        if host.is_some() || port.is_some() {
            tracing::debug!("Listen address overridden from environment");
        }
        self.override_listen(host.as_deref(), port);

        if let Some(cert) = lookup("RFB_CERT").filter(|v| !v.is_empty()) {
            self.tls.cert_path = Some(PathBuf::from(cert));
        }
        if let Some(key) = lookup("RFB_KEY").filter(|v| !v.is_empty()) {
            self.tls.key_path = Some(PathBuf::from(key));
        }
        if let Some(service) = lookup("RFB_PAM_SERVICE").filter(|v| !v.is_empty()) {
            tracing::debug!("Using PAM service {:?} from environment", service);
            self.auth.pam_service = service;
        }
        Ok(())
    }

    /// Replace the host and/or port part of `bind_address`
    pub fn override_listen(&mut self, host: Option<&str>, port: Option<u16>) {
        if host.is_none() && port.is_none() {
            return;
        }
        let (current_host, current_port) = match self.bind_address.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.to_string()),
            None => (self.bind_address.clone(), "5900".to_string()),
        };
        let host = match host {
            Some(h) if h.contains(':') && !h.starts_with('[') => format!("[{}]", h),
            Some(h) => h.to_string(),
            None => current_host,
        };
        let port = port.map(|p| p.to_string()).unwrap_or(current_port);
        self.bind_address = format!("{}:{}", host, port);
    }

    /// Check that everything needed to serve is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls.cert_path.is_none() {
            return Err(ConfigError::MissingField("tls.cert_path".to_string()));
        }
        if self.tls.key_path.is_none() {
            return Err(ConfigError::MissingField("tls.key_path".to_string()));
        }
        if self.auth.backend == AuthBackend::Static && self.auth.users_file.is_none() {
            return Err(ConfigError::MissingField("auth.users_file".to_string()));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// TLS certificate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: Option<PathBuf>,

    /// PEM private key
    pub key_path: Option<PathBuf>,
}

/// Which credential backend verifies viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthBackend {
    /// System accounts through PAM
    Pam,
    /// A TOML file of salted password digests
    Static,
}

/// Credential backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Backend to use
    pub backend: AuthBackend,

    /// PAM service name
    pub pam_service: String,

    /// Users file for the static backend
    pub users_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: AuthBackend::Pam,
            pam_service: "vnc".to_string(),
            users_file: None,
        }
    }
}

/// Display session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Display server binary
    pub xvnc_path: PathBuf,

    /// Binary used to run commands as the target user
    pub su_path: PathBuf,

    /// Directory holding per-user RFB sockets
    pub socket_dir: PathBuf,

    /// First X display number handed out
    pub first_display: u32,

    /// How long a display server may take to start listening
    #[serde(with = "duration_secs")]
    pub start_timeout: Duration,

    /// Session script used when the user has no `~/.xinitrc`
    pub system_xinitrc: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            xvnc_path: PathBuf::from("/usr/bin/Xvnc"),
            su_path: PathBuf::from("su"),
            socket_dir: PathBuf::from("/tmp"),
            first_display: 100,
            start_timeout: Duration::from_secs(30),
            system_xinitrc: PathBuf::from("/etc/X11/xinit/xinitrc"),
        }
    }
}

impl BackendConfig {
    /// Socket path of the display server for `username`
    pub fn socket_path(&self, username: &str) -> PathBuf {
        self.socket_dir.join(format!("rfb-{}.sock", username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:5900");
        assert_eq!(config.handshake_deadline(), Some(Duration::from_secs(30)));
        assert_eq!(config.auth.backend, AuthBackend::Pam);
        assert_eq!(config.auth.pam_service, "vnc");
        assert_eq!(config.backend.first_display, 100);
        assert_eq!(
            config.backend.socket_path("bob"),
            PathBuf::from("/tmp/rfb-bob.sock")
        );
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            handshake_timeout = 0

            [tls]
            cert_path = "/etc/vnc/cert.pem"
            key_path = "/etc/vnc/key.pem"

            [auth]
            backend = "static"
            users_file = "/etc/vnc/users.toml"

            [backend]
            first_display = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:5900");
        assert_eq!(config.handshake_deadline(), None);
        assert_eq!(config.auth.backend, AuthBackend::Static);
        assert_eq!(config.backend.first_display, 20);
        assert_eq!(config.backend.xvnc_path, PathBuf::from("/usr/bin/Xvnc"));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_env_from(env(&[
                ("RFB_HOST", "127.0.0.1"),
                ("RFB_PORT", "5901"),
                ("RFB_CERT", "/certs/cert.pem"),
                ("RFB_KEY", "/certs/key.pem"),
                ("RFB_PAM_SERVICE", "login"),
            ]))
            .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:5901");
        assert_eq!(config.tls.cert_path, Some(PathBuf::from("/certs/cert.pem")));
        assert_eq!(config.tls.key_path, Some(PathBuf::from("/certs/key.pem")));
        assert_eq!(config.auth.pam_service, "login");
    }

    #[test]
    fn test_env_port_only_keeps_host() {
        let mut config = GatewayConfig::default();
        config.apply_env_from(env(&[("RFB_PORT", "6000")])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:6000");

        let mut config = GatewayConfig::default();
        config.apply_env_from(env(&[("RFB_HOST", "::1")])).unwrap();
        assert_eq!(config.bind_address, "[::1]:5900");
    }

    #[test]
    fn test_env_rejects_bad_port() {
        let mut config = GatewayConfig::default();
        let result = config.apply_env_from(env(&[("RFB_PORT", "vnc")]));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_requires_tls_material() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "tls.cert_path"
        ));

        let mut config = GatewayConfig::default();
        config.tls.cert_path = Some(PathBuf::from("c.pem"));
        config.tls.key_path = Some(PathBuf::from("k.pem"));
        config.auth.backend = AuthBackend::Static;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field == "auth.users_file"
        ));
    }
}
