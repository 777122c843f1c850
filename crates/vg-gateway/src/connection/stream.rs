//! Transport to a backend display server

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use vg_core::error::BackendError;
use vg_core::BackendEndpoint;

/// A connected backend, over TCP or a Unix domain socket
pub enum BackendStream {
    /// TCP connection
    Tcp(TcpStream),
    /// Unix domain socket connection
    #[cfg(unix)]
    Unix(UnixStream),
}

impl BackendStream {
    /// Connect to a backend endpoint
    pub async fn connect(endpoint: &BackendEndpoint) -> Result<Self, BackendError> {
        let connect_error = |source: io::Error| BackendError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };

        match endpoint {
            BackendEndpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(connect_error)?;
                stream.set_nodelay(true).map_err(connect_error)?;
                Ok(BackendStream::Tcp(stream))
            }
            #[cfg(unix)]
            BackendEndpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_error)?;
                Ok(BackendStream::Unix(stream))
            }
            #[cfg(not(unix))]
            BackendEndpoint::Unix(_) => Err(connect_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "Unix domain sockets are not supported on this platform",
            ))),
        }
    }
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            BackendStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ping").await.unwrap();
        });

        let mut stream = BackendStream::connect(&BackendEndpoint::Tcp(addr))
            .await
            .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_unix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfb-test.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = BackendStream::connect(&BackendEndpoint::Unix(path))
            .await
            .unwrap();
        stream.write_all(b"pong").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_connect_failure_names_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = BackendEndpoint::Unix(dir.path().join("absent.sock"));
        let err = BackendStream::connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, BackendError::Connect { .. }));
        assert!(err.to_string().contains("absent.sock"));
    }
}
