//! Upstream dialing.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("failed to connect to upstream {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to upstream {addr} timed out after {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },
}

/// Open the server-side socket for a new session.
pub async fn connect_upstream(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, UpstreamError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            // Framed messages are written in one call; Nagle only adds latency.
            if let Err(e) = stream.set_nodelay(true) {
                tracing::trace!(upstream = %addr, error = %e, "Failed to set TCP_NODELAY");
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(UpstreamError::Connect { addr, source }),
        Err(_) => Err(UpstreamError::Timeout { addr, after: timeout }),
    }
}
