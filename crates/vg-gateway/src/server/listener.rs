//! Viewer listener
//!
//! Accepts incoming connections and spawns a handler for each one.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::server::handler::ConnectionHandler;
use crate::state::GatewayState;

/// Listens for viewers and runs one task per connection
pub struct GatewayServer {
    /// Shared gateway state
    state: Arc<GatewayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
    /// Connection limit (None = unlimited)
    limiter: Option<Arc<Semaphore>>,
    /// Next connection number
    next_id: AtomicU64,
}

impl GatewayServer {
    /// Create a new server
    pub fn new(state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        let limiter = state
            .config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max as usize)));
        Self {
            state,
            cancel,
            limiter,
            next_id: AtomicU64::new(1),
        }
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        match &self.limiter {
            Some(limiter) => tracing::info!(
                "Listening for viewers on {} (max {} connections)",
                local_addr,
                limiter.available_permits()
            ),
            None => tracing::info!("Listening for viewers on {}", local_addr),
        }

        loop {
            tokio::select! {
                // Check for shutdown
                _ = self.cancel.cancelled() => {
                    tracing::info!("Gateway listener shutting down");
                    break;
                }

                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a new incoming connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = match &self.limiter {
            Some(limiter) => match Arc::clone(limiter).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Connection limit reached, closing {}", peer_addr);
                    return;
                }
            },
            None => None,
        };

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("New connection {} from {}", id, peer_addr);

        let handler = ConnectionHandler::new(
            Arc::clone(&self.state),
            id,
            peer_addr,
            self.cancel.clone(),
        );
        let span = tracing::info_span!("connection", id, peer = %peer_addr);

        tokio::spawn(
            async move {
                handler.run(socket).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
}
