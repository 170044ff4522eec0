//! Transport connection wrapper.
//!
//! # Responsibilities
//! - Wrap one socket (client-side or server-side)
//! - Byte-oriented receive/send with per-connection transfer counters
//! - Idempotent close; report peer closure as a terminal error
//!
//! # Design Decisions
//! - Generic over any `AsyncRead + AsyncWrite` stream (TCP, TLS, duplex pipes)
//! - Split into `Inbound` and `Outbound` halves so both relay directions of a
//!   session make progress concurrently
//! - No retries or reconnection: every failure goes up to the session

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Which side of the proxy a connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    Client,
    Server,
}

impl Peer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Peer::Client => "client",
            Peer::Server => "server",
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for transport operations. Every variant is terminal for the
/// owning session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0} closed the connection")]
    PeerClosed(Peer),
    #[error("{0} idle for longer than {1:?}")]
    IdleTimeout(Peer, Duration),
    #[error("{peer} transport error: {source}")]
    Io {
        peer: Peer,
        #[source]
        source: io::Error,
    },
}

/// Cumulative counters shared by both halves of a connection.
#[derive(Debug, Default)]
pub struct TransferStats {
    received: AtomicU64,
    sent: AtomicU64,
    closed: AtomicBool,
}

impl TransferStats {
    /// Raw bytes received, counted per chunk regardless of framing outcome.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Receiving half of a connection.
pub struct Inbound<S> {
    peer: Peer,
    reader: ReadHalf<S>,
    scratch: Vec<u8>,
    idle_timeout: Option<Duration>,
    stats: Arc<TransferStats>,
}

impl<S: AsyncRead> Inbound<S> {
    /// Read at most `max_bytes` from the peer.
    ///
    /// A zero-byte read means the peer closed its side and is reported as
    /// [`TransportError::PeerClosed`]. Callers must not retry on error.
    pub async fn receive(&mut self, max_bytes: usize) -> Result<Bytes, TransportError> {
        if self.stats.is_closed() {
            return Err(TransportError::PeerClosed(self.peer));
        }
        if self.scratch.len() < max_bytes {
            self.scratch.resize(max_bytes, 0);
        }
        let buf = &mut self.scratch[..max_bytes];

        let read = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.reader.read(buf)).await {
                Ok(result) => result,
                Err(_) => return Err(TransportError::IdleTimeout(self.peer, limit)),
            },
            None => self.reader.read(buf).await,
        };

        let n = read.map_err(|source| TransportError::Io { peer: self.peer, source })?;
        if n == 0 {
            return Err(TransportError::PeerClosed(self.peer));
        }
        self.stats.received.fetch_add(n as u64, Ordering::Relaxed);
        Ok(Bytes::copy_from_slice(&self.scratch[..n]))
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }
}

/// Sending half of a connection.
pub struct Outbound<S> {
    peer: Peer,
    writer: WriteHalf<S>,
    stats: Arc<TransferStats>,
}

impl<S: AsyncWrite> Outbound<S> {
    /// Write the whole buffer. Failure is terminal for the session.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.stats.is_closed() {
            return Err(TransportError::PeerClosed(self.peer));
        }
        self.writer
            .write_all(data)
            .await
            .map_err(|source| TransportError::Io { peer: self.peer, source })?;
        self.writer
            .flush()
            .await
            .map_err(|source| TransportError::Io { peer: self.peer, source })?;
        self.stats.sent.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Shut down the write side. Only the first call does anything.
    pub async fn close(&mut self) {
        if self.stats.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!(peer = %self.peer, error = %e, "Shutdown after peer already gone");
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }
}

/// One socket owned by exactly one session.
pub struct Connection<S> {
    peer: Peer,
    addr: SocketAddr,
    inbound: Inbound<S>,
    outbound: Outbound<S>,
    stats: Arc<TransferStats>,
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wrap a connected stream.
    pub fn new(peer: Peer, addr: SocketAddr, stream: S) -> Self {
        let stats = Arc::new(TransferStats::default());
        let (reader, writer) = tokio::io::split(stream);
        Self {
            peer,
            addr,
            inbound: Inbound {
                peer,
                reader,
                scratch: Vec::new(),
                idle_timeout: None,
                stats: Arc::clone(&stats),
            },
            outbound: Outbound {
                peer,
                writer,
                stats: Arc::clone(&stats),
            },
            stats,
        }
    }

    /// Fail reads that see no data within `limit`. `None` waits forever.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.inbound.idle_timeout = limit;
        self
    }

    pub async fn receive(&mut self, max_bytes: usize) -> Result<Bytes, TransportError> {
        self.inbound.receive(max_bytes).await
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.outbound.send(data).await
    }

    pub async fn close(&mut self) {
        self.outbound.close().await;
    }

    /// Borrow both halves at once.
    pub fn halves_mut(&mut self) -> (&mut Inbound<S>, &mut Outbound<S>) {
        (&mut self.inbound, &mut self.outbound)
    }

    pub fn stats(&self) -> Arc<TransferStats> {
        Arc::clone(&self.stats)
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.stats.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn receive_counts_every_chunk() {
        let mock = tokio_test::io::Builder::new()
            .read(b"abc")
            .read(b"defgh")
            .build();
        let mut conn = Connection::new(Peer::Client, addr(), mock);

        assert_eq!(&conn.receive(8192).await.unwrap()[..], b"abc");
        assert_eq!(&conn.receive(8192).await.unwrap()[..], b"defgh");
        assert_eq!(conn.stats().received(), 8);
    }

    #[tokio::test]
    async fn receive_respects_max_bytes() {
        let mock = tokio_test::io::Builder::new().read(b"0123456789").build();
        let mut conn = Connection::new(Peer::Server, addr(), mock);

        assert_eq!(&conn.receive(4).await.unwrap()[..], b"0123");
        assert_eq!(&conn.receive(4).await.unwrap()[..], b"4567");
        assert_eq!(&conn.receive(4).await.unwrap()[..], b"89");
    }

    #[tokio::test]
    async fn eof_is_peer_closed() {
        let mock = tokio_test::io::Builder::new().build();
        let mut conn = Connection::new(Peer::Server, addr(), mock);

        let err = conn.receive(16).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed(Peer::Server)));
    }

    #[tokio::test]
    async fn read_error_is_reported() {
        let mock = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut conn = Connection::new(Peer::Client, addr(), mock);

        let err = conn.receive(16).await.unwrap_err();
        assert!(matches!(err, TransportError::Io { peer: Peer::Client, .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (ours, mut theirs) = duplex(64);
        let mut conn = Connection::new(Peer::Client, addr(), ours);

        conn.send(b"hi").await.unwrap();
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());

        let mut buf = Vec::new();
        theirs.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hi");

        assert!(matches!(conn.send(b"late").await, Err(TransportError::PeerClosed(_))));
        assert!(matches!(conn.receive(16).await, Err(TransportError::PeerClosed(_))));
        assert_eq!(conn.stats().sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fires() {
        let (ours, _theirs) = duplex(64);
        let mut conn = Connection::new(Peer::Server, addr(), ours)
            .with_idle_timeout(Some(Duration::from_secs(5)));

        let err = conn.receive(16).await.unwrap_err();
        assert!(matches!(err, TransportError::IdleTimeout(Peer::Server, _)));
    }
}
