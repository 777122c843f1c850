//! Shared gateway state

use std::sync::Arc;

use vg_core::config::GatewayConfig;
use vg_core::traits::{CredentialGate, SessionBroker};

use crate::tls::TlsUpgrader;

/// Everything a connection handler needs, shared across connections
pub struct GatewayState {
    /// Configuration
    pub config: GatewayConfig,
    /// TLS upgrade for viewer sockets
    pub tls: TlsUpgrader,
    /// Credential backend
    pub credentials: Arc<dyn CredentialGate>,
    /// Display session broker
    pub sessions: Arc<dyn SessionBroker>,
}

impl GatewayState {
    /// Create gateway state
    pub fn new(
        config: GatewayConfig,
        tls: TlsUpgrader,
        credentials: Arc<dyn CredentialGate>,
        sessions: Arc<dyn SessionBroker>,
    ) -> Self {
        Self {
            config,
            tls,
            credentials,
            sessions,
        }
    }
}
