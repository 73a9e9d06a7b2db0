//! Byte-stream connection split into a reader and a shared writer.
//!
//! The reader is owned by whoever drives inbound traffic (the dispatch loop
//! or a one-shot locator exchange). The writer is cloneable; every write
//! takes an async mutex so concurrent callers never interleave partial
//! messages on the wire.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Transport {
    reader: TransportReader,
    writer: TransportWriter,
}

impl Transport {
    /// Wrap an already open stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: TransportReader { inner: Box::new(read_half) },
            writer: TransportWriter { inner: Arc::new(Mutex::new(Box::new(write_half))) },
        }
    }

    /// Open a TCP connection to `addr` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectTimeout`] when the connection is not
    /// established within `timeout`, [`TransportError::Connect`] otherwise.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout { addr: addr.to_owned() })?
            .map_err(|source| TransportError::Connect { addr: addr.to_owned(), source })?;
        // Frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        debug!(%addr, "transport connected");
        Ok(Self::new(stream))
    }

    #[must_use]
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        (self.reader, self.writer)
    }
}

pub struct TransportReader {
    inner: BoxedReader,
}

impl TransportReader {
    /// Next buffer of received bytes, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Propagates the underlying read error.
    pub async fn read(&mut self) -> io::Result<Option<BytesMut>> {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let n = self.inner.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}

#[derive(Clone)]
pub struct TransportWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl TransportWriter {
    /// Write one complete message.
    ///
    /// # Errors
    ///
    /// Propagates the underlying write or flush error.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.write_all(bytes).await?;
        inner.flush().await
    }

    /// Close the write side of the connection.
    ///
    /// # Errors
    ///
    /// Propagates the underlying shutdown error.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
