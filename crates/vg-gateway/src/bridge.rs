//! Raw relay between an authenticated viewer and a ready backend

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vg_protocol::{AuthResult, ProtocolVersion};

/// Buffer size for each relay direction
const RELAY_BUF_SIZE: usize = 16 * 1024;

/// Why a bridge stopped relaying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The backend side ended first
    BackendTerminated,
    /// The viewer side ended first
    ClientClosed,
    /// The gateway is shutting down
    Cancelled,
}

/// Which end stopped a one-way relay
#[derive(Debug)]
enum RelayEnd {
    /// The reading side hit end of stream or a read error
    Source(io::Result<()>),
    /// Writing to the other side failed
    Sink(io::Error),
}

/// Copy `src` into `dst` until one of them stops
///
/// Each chunk is written and flushed before the next read, so a slow
/// sink holds back the source instead of growing a buffer.
async fn relay<R, W>(src: &mut R, dst: &mut W) -> RelayEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => return RelayEnd::Source(Ok(())),
            Ok(n) => n,
            Err(e) => return RelayEnd::Source(Err(e)),
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            return RelayEnd::Sink(e);
        }
        if let Err(e) = dst.flush().await {
            return RelayEnd::Sink(e);
        }
    }
}

/// One viewer paired with one backend
pub struct Bridge<C, B> {
    client: C,
    backend: B,
    version: ProtocolVersion,
    to_backend: Bytes,
    to_client: Bytes,
}

impl<C, B> Bridge<C, B>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    /// Pair a viewer that negotiated `version` with a backend
    pub fn new(client: C, backend: B, version: ProtocolVersion) -> Self {
        Self {
            client,
            backend,
            version,
            to_backend: Bytes::new(),
            to_client: Bytes::new(),
        }
    }

    /// Bytes already read off either side during the handshakes
    pub fn with_pending(mut self, to_backend: Bytes, to_client: Bytes) -> Self {
        self.to_backend = to_backend;
        self.to_client = to_client;
        self
    }

    /// Send the deferred success code, then relay until either side ends
    ///
    /// Both write halves are shut down on the way out; errors from a side
    /// that is already closed are ignored.
    pub async fn run(self, cancel: &CancellationToken) -> io::Result<Teardown> {
        let Bridge {
            mut client,
            mut backend,
            version,
            to_backend,
            to_client,
        } = self;

        client.write_all(&AuthResult::Ok.to_bytes(version)).await?;
        if !to_client.is_empty() {
            client.write_all(&to_client).await?;
        }
        client.flush().await?;
        if !to_backend.is_empty() {
            backend.write_all(&to_backend).await?;
            backend.flush().await?;
        }

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

        // A failed write is blamed on the side being written to
        let teardown = tokio::select! {
            end = relay(&mut client_rd, &mut backend_wr) => {
                debug!(?end, "viewer to backend relay finished");
                match end {
                    RelayEnd::Source(_) => Teardown::ClientClosed,
                    RelayEnd::Sink(_) => Teardown::BackendTerminated,
                }
            }
            end = relay(&mut backend_rd, &mut client_wr) => {
                debug!(?end, "backend to viewer relay finished");
                match end {
                    RelayEnd::Source(_) => Teardown::BackendTerminated,
                    RelayEnd::Sink(_) => Teardown::ClientClosed,
                }
            }
            _ = cancel.cancelled() => Teardown::Cancelled,
        };

        match teardown {
            Teardown::BackendTerminated => info!("backend terminated"),
            Teardown::ClientClosed => info!("client closed connection"),
            Teardown::Cancelled => info!("relay cancelled by shutdown"),
        }

        let _ = client_wr.shutdown().await;
        let _ = backend_wr.shutdown().await;
        Ok(teardown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, ReadBuf};

    const WAIT: Duration = Duration::from_secs(5);

    /// A display link that never delivers data and rejects every write
    struct DeadDisplay;

    impl AsyncRead for DeadDisplay {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for DeadDisplay {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_relay_and_client_close() {
        let (mut viewer, client_side) = duplex(4096);
        let (mut display, backend_side) = duplex(4096);
        let cancel = CancellationToken::new();

        let bridge = Bridge::new(client_side, backend_side, ProtocolVersion::V3_8)
            .with_pending(Bytes::from_static(&[1]), Bytes::from_static(b"early"));
        let task = tokio::spawn(async move { bridge.run(&cancel).await });

        let mut head = [0u8; 9];
        viewer.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"\0\0\0\0early");

        let mut shared = [0u8; 1];
        display.read_exact(&mut shared).await.unwrap();
        assert_eq!(shared, [1]);

        viewer.write_all(b"key event").await.unwrap();
        let mut buf = [0u8; 9];
        display.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"key event");

        display.write_all(b"frame").await.unwrap();
        let mut buf = [0u8; 5];
        viewer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"frame");

        drop(viewer);
        let teardown = tokio::time::timeout(WAIT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(teardown, Teardown::ClientClosed);

        let mut rest = Vec::new();
        tokio::time::timeout(WAIT, display.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_backend_exit_closes_client() {
        let (mut viewer, client_side) = duplex(4096);
        let (display, backend_side) = duplex(4096);
        let cancel = CancellationToken::new();

        let bridge = Bridge::new(client_side, backend_side, ProtocolVersion::V3_3);
        let task = tokio::spawn(async move { bridge.run(&cancel).await });

        drop(display);
        let teardown = tokio::time::timeout(WAIT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(teardown, Teardown::BackendTerminated);

        let mut received = Vec::new();
        tokio::time::timeout(WAIT, viewer.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_backend_write_failure_is_backend_teardown() {
        let (mut viewer, client_side) = duplex(4096);
        let cancel = CancellationToken::new();

        let bridge = Bridge::new(client_side, DeadDisplay, ProtocolVersion::V3_8);
        let task = tokio::spawn(async move { bridge.run(&cancel).await });

        let mut code = [0u8; 4];
        viewer.read_exact(&mut code).await.unwrap();
        viewer.write_all(b"pointer event").await.unwrap();

        let teardown = tokio::time::timeout(WAIT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(teardown, Teardown::BackendTerminated);

        let mut rest = Vec::new();
        tokio::time::timeout(WAIT, viewer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_relay() {
        let (_viewer, client_side) = duplex(4096);
        let (_display, backend_side) = duplex(4096);
        let cancel = CancellationToken::new();

        let bridge = Bridge::new(client_side, backend_side, ProtocolVersion::V3_8);
        let token = cancel.clone();
        let task = tokio::spawn(async move { bridge.run(&token).await });

        cancel.cancel();
        let teardown = tokio::time::timeout(WAIT, task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(teardown, Teardown::Cancelled);
    }
}
