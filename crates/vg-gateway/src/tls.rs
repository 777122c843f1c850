//! Server-side TLS for the VeNCrypt upgrade
//!
//! The viewer's socket starts out plaintext and is handed to
//! [`TlsUpgrader::accept`] once the security negotiation has agreed on
//! X509Plain. Certificate and key are loaded once at startup.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;

use vg_core::error::TlsError;

/// Upgrades plaintext viewer connections to TLS
#[derive(Clone)]
pub struct TlsUpgrader {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsUpgrader {
    /// Load the certificate chain and private key from PEM files
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let certs = load_certificates(cert_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(cert_path, "no certificates found in file"));
        }
        let key = load_private_key(key_path)?;
        Self::build(certs, key)
    }

    /// Build from in-memory PEM text
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut Cursor::new(cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::config(format!("Invalid certificate PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(TlsError::config("no certificates found in PEM"));
        }
        let key = rustls_pemfile::private_key(&mut Cursor::new(key_pem))
            .map_err(|e| TlsError::config(format!("Invalid private key PEM: {}", e)))?
            .ok_or_else(|| TlsError::config("no private key found in PEM"))?;
        Self::build(certs, key)
    }

    fn build(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let provider = rustls::crypto::ring::default_provider();

        let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::config(format!("Failed to build TLS config: {}", e)))?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the TLS handshake on an established stream
    pub async fn accept<S>(&self, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::handshake(e.to_string()))
    }
}

/// Load certificates from a PEM file
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))
}

/// Load a private key (RSA, PKCS8 or EC) from a PEM file
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}
