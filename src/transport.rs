//! The socket collaborator the session owner reads from and writes to.
//!
//! Kept as a trait so the session owner can be driven by an in-memory pipe
//! in tests without opening a real socket.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A byte-oriented duplex connection to the FIX counterparty.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads at least one byte into `buf`, returning the number of bytes
    /// read. Returns `Ok(0)` on a clean EOF.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes the entire buffer, returning once accepted by the OS socket buffer.
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Closes the connection. Best-effort: errors are not actionable here.
    async fn shutdown(&mut self);
}

/// Opens a TCP connection to `host:port` with `TCP_NODELAY` set, respecting
/// `connect_timeout`.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> io::Result<TcpTransport> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(TcpTransport { stream })
}

/// Default `Transport` implementation backed by a Tokio `TcpStream`.
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use tokio::io::DuplexStream;

    /// An in-memory duplex-pipe `Transport`, for driving the session owner
    /// in tests without a real socket.
    pub struct DuplexTransport {
        pub(crate) inner: DuplexStream,
    }

    #[async_trait]
    impl Transport for DuplexTransport {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf).await
        }

        async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.inner.write_all(buf).await
        }

        async fn shutdown(&mut self) {
            let _ = AsyncWriteExt::shutdown(&mut self.inner).await;
        }
    }

    /// Creates a connected pair: the first is handed to the session owner,
    /// the second lets the test act as the FIX counterparty.
    pub fn duplex_pair(buf_size: usize) -> (DuplexTransport, DuplexTransport) {
        let (a, b) = tokio::io::duplex(buf_size);
        (DuplexTransport { inner: a }, DuplexTransport { inner: b })
    }
}
