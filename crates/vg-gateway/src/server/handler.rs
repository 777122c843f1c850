//! Per-connection driver
//!
//! Runs phase 1, the TLS upgrade and phase 2 under the handshake
//! deadline, then resolves the user's display session, negotiates with
//! it and hands both sockets to the bridge. Every error ends this
//! connection only.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vg_core::error::BackendError;
use vg_core::GatewayError;

use crate::bridge::Bridge;
use crate::connection::{BackendStream, ConnectionContext};
use crate::handshake::{backend, client, ClientAuth};
use crate::state::GatewayState;

/// Handles a single viewer connection from accept to teardown
pub struct ConnectionHandler {
    state: Arc<GatewayState>,
    ctx: ConnectionContext,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Create a handler for an accepted connection
    pub fn new(
        state: Arc<GatewayState>,
        id: u64,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            ctx: ConnectionContext::new(id, peer),
            cancel,
        }
    }

    /// Drive the connection to completion, logging how it ended
    pub async fn run<S>(mut self, socket: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.serve(socket).await {
            Ok(()) => debug!("connection finished"),
            Err(e) => log_failure(&e),
        }
    }

    async fn serve<S>(&mut self, mut socket: S) -> Result<(), GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let ctx = &mut self.ctx;

        let handshake = async {
            client::negotiate_security(&mut socket, ctx).await?;
            let mut tls = client::upgrade(socket, &state.tls, ctx).await?;
            let auth = client::authenticate(&mut tls, ctx, state.credentials.as_ref()).await?;
            Ok::<_, GatewayError>((tls, auth))
        };

        let (tls, auth) = tokio::select! {
            result = with_deadline(state.config.handshake_deadline(), handshake) => result?,
            _ = cancel.cancelled() => {
                debug!("handshake cancelled by shutdown");
                return Ok(());
            }
        };

        let (username, leftover) = match auth {
            ClientAuth::Authenticated { username, leftover } => (username, leftover),
            ClientAuth::Rejected { .. } => return Ok(()),
        };
        info!(%username, "viewer authenticated");

        let endpoint = state.sessions.resolve(&username).await?;
        let mut backend_stream = BackendStream::connect(&endpoint).await?;
        let ready = backend::negotiate(&mut backend_stream).await?;
        info!(
            %username,
            %endpoint,
            backend_version = %ready.version,
            "bridging to display session"
        );

        Bridge::new(tls, backend_stream, self.ctx.version_or_default())
            .with_pending(leftover, ready.leftover)
            .run(&cancel)
            .await?;
        Ok(())
    }
}

async fn with_deadline<F, T>(limit: Option<Duration>, fut: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| GatewayError::HandshakeTimeout(limit))?,
        None => fut.await,
    }
}

fn log_failure(err: &GatewayError) {
    if err.is_disconnect() {
        info!("peer disconnected: {}", err);
        return;
    }
    match err {
        GatewayError::Protocol(_) => warn!("protocol violation: {}", err),
        GatewayError::HandshakeTimeout(_) => warn!("{}", err),
        GatewayError::Backend(BackendError::Handshake(_)) => {
            warn!("backend handshake failed: {}", err)
        }
        GatewayError::Backend(BackendError::ExitedBeforeReady { .. }) => {
            warn!("backend terminated: {}", err)
        }
        _ => error!("connection failed: {}", err),
    }
}
