//! Proxy accept loop.
//!
//! # Responsibilities
//! - Accept client connections within the connection limit
//! - Dial the upstream for each client and start a session
//! - On shutdown, stop accepting, close every session and wait for them to drain
//!
//! A client whose upstream cannot be reached has its connection closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::audit::AuditEmitter;
use crate::config::{FramingConfig, ProxyConfig};
use crate::net::{connect_upstream, Connection, ConnectionPermit, Listener, ListenerError, Peer};
use crate::session::{CloseReason, Session, SessionRegistry};

/// How long shutdown waits for sessions to finish closing.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyServer {
    upstream: SocketAddr,
    framing: FramingConfig,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    registry: Arc<SessionRegistry>,
    emitter: AuditEmitter,
    accepting: Arc<AtomicBool>,
}

impl ProxyServer {
    pub fn new(upstream: SocketAddr, config: &ProxyConfig, registry: Arc<SessionRegistry>, emitter: AuditEmitter) -> Self {
        Self {
            upstream,
            framing: config.framing.clone(),
            connect_timeout: config.timeouts.connect(),
            idle_timeout: config.timeouts.idle(),
            registry,
            emitter,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Accept until `shutdown` fires, then drain.
    ///
    /// Consumes the server so its audit emitter is dropped on return.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, upstream = %self.upstream, "Proxy accepting connections");
        }

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, client_addr, permit)) => self.spawn_session(stream, client_addr, permit),
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Listener failed");
                        break Err(e);
                    }
                },
            }
        };

        self.accepting.store(false, Ordering::SeqCst);
        let closing = self.registry.close_all(CloseReason::Shutdown);
        tracing::info!(sessions = closing, "Draining sessions");
        if !self.registry.wait_empty(DRAIN_TIMEOUT).await {
            tracing::warn!(remaining = self.registry.len(), "Sessions still open after drain timeout");
        }
        result
    }

    fn spawn_session(&self, mut client_stream: TcpStream, client_addr: SocketAddr, permit: ConnectionPermit) {
        let upstream = self.upstream;
        let connect_timeout = self.connect_timeout;
        let idle_timeout = self.idle_timeout;
        let framing = self.framing.clone();
        let registry = Arc::clone(&self.registry);
        let emitter = self.emitter.clone();
        let accepting = Arc::clone(&self.accepting);

        tokio::spawn(async move {
            let _permit = permit;

            let server_stream = match connect_upstream(upstream, connect_timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(peer_addr = %client_addr, error = %e, "Upstream unavailable, closing client");
                    let _ = client_stream.shutdown().await;
                    return;
                }
            };
            let server_addr = server_stream.peer_addr().unwrap_or(upstream);
            if let Err(e) = client_stream.set_nodelay(true) {
                tracing::trace!(peer_addr = %client_addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let session = Session::new(
                Connection::new(Peer::Client, client_addr, client_stream).with_idle_timeout(idle_timeout),
                Connection::new(Peer::Server, server_addr, server_stream).with_idle_timeout(idle_timeout),
                &framing,
                emitter,
            );
            let handle = session.handle();
            registry.register(handle.clone());
            if !accepting.load(Ordering::SeqCst) {
                handle.close(CloseReason::Shutdown);
            }

            session.run().await;
            registry.deregister(handle.id());
        });
    }
}
