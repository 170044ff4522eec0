//! Session controller.
//!
//! # Responsibilities
//! - Own the client and server connections of one session
//! - Relay framed requests client → server and framed responses server → client
//! - Emit one audit event per forwarded message
//! - Close both connections together on the first failure or close request
//!
//! # Design Decisions
//! - The two directions are joined inside one task; neither waits on the other
//! - Loops blocked in a read wake through the control block's signal
//! - Nothing new is forwarded once the session has left `Active`; a message
//!   already being written gets [`SEND_GRACE`] to finish, after which the
//!   peer may see it truncated

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::audit::{AuditEmitter, Exchange};
use crate::config::FramingConfig;
use crate::http::{FramingError, MessageFramer, PendingMessage};
use crate::net::{Connection, Inbound, Outbound, TransferStats};
use crate::observability::metrics;
use crate::session::control::{CloseReason, SessionControl, SessionState};
use crate::session::{Direction, SessionId, SessionInfo};

/// How long an in-flight write may continue after the session starts closing.
pub const SEND_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub id: SessionId,
    pub reason: CloseReason,
    pub client_to_server_bytes: u64,
    pub server_to_client_bytes: u64,
    pub messages_forwarded: u64,
}

/// Shared view of a running session, used by the registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    info: SessionInfo,
    control: Arc<SessionControl>,
    client_stats: Arc<TransferStats>,
    server_stats: Arc<TransferStats>,
    messages: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.info.id
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Ask the session to stop. Returns false if it was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.control.begin_close(reason)
    }

    pub fn client_to_server_bytes(&self) -> u64 {
        self.client_stats.received()
    }

    pub fn server_to_client_bytes(&self) -> u64 {
        self.server_stats.received()
    }

    pub fn messages_forwarded(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

pub struct Session<C, S> {
    info: SessionInfo,
    client: Connection<C>,
    server: Connection<S>,
    request_framer: MessageFramer,
    response_framer: MessageFramer,
    control: Arc<SessionControl>,
    messages: Arc<AtomicU64>,
    emitter: AuditEmitter,
}

impl<C, S> Session<C, S>
where
    C: AsyncRead + AsyncWrite,
    S: AsyncRead + AsyncWrite,
{
    pub fn new(client: Connection<C>, server: Connection<S>, framing: &FramingConfig, emitter: AuditEmitter) -> Self {
        Self {
            info: SessionInfo::new(client.addr(), server.addr()),
            client,
            server,
            request_framer: MessageFramer::for_requests(framing),
            response_framer: MessageFramer::for_responses(framing),
            control: Arc::new(SessionControl::new()),
            messages: Arc::new(AtomicU64::new(0)),
            emitter,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            info: self.info.clone(),
            control: Arc::clone(&self.control),
            client_stats: self.client.stats(),
            server_stats: self.server.stats(),
            messages: Arc::clone(&self.messages),
        }
    }

    /// Relay until either side fails or a close is requested, then tear down.
    pub async fn run(mut self) -> SessionReport {
        metrics::record_session_opened();
        tracing::debug!(
            session_id = %self.info.id,
            peer_addr = %self.info.client_addr,
            server_addr = %self.info.server_addr,
            "Session started"
        );

        {
            let (client_in, client_out) = self.client.halves_mut();
            let (server_in, server_out) = self.server.halves_mut();

            let upstream = Pump {
                direction: Direction::ClientToServer,
                framer: &self.request_framer,
                info: &self.info,
                control: &self.control,
                messages: &self.messages,
                emitter: &self.emitter,
            };
            let downstream = Pump {
                direction: Direction::ServerToClient,
                framer: &self.response_framer,
                ..upstream
            };

            tokio::join!(upstream.run(client_in, server_out), downstream.run(server_in, client_out));
        }

        self.client.close().await;
        self.server.close().await;
        self.control.mark_closed();

        // Every pump exit sets a reason before returning.
        let reason = self.control.reason().unwrap_or(CloseReason::Shutdown);
        let report = SessionReport {
            id: self.info.id,
            reason,
            client_to_server_bytes: self.client.stats().received(),
            server_to_client_bytes: self.server.stats().received(),
            messages_forwarded: self.messages.load(Ordering::Relaxed),
        };

        metrics::record_bytes_received(Direction::ClientToServer.as_str(), report.client_to_server_bytes);
        metrics::record_bytes_received(Direction::ServerToClient.as_str(), report.server_to_client_bytes);
        metrics::record_session_closed(reason.as_str());

        match reason {
            CloseReason::MessageTooLarge { .. } => tracing::warn!(
                session_id = %report.id,
                reason = %reason,
                "Session closed after oversized message"
            ),
            CloseReason::IdleTimeout { .. } => tracing::info!(
                session_id = %report.id,
                reason = %reason,
                "Session closed after idle timeout"
            ),
            _ => tracing::debug!(
                session_id = %report.id,
                reason = %reason,
                client_to_server_bytes = report.client_to_server_bytes,
                server_to_client_bytes = report.server_to_client_bytes,
                messages = report.messages_forwarded,
                "Session closed"
            ),
        }
        report
    }
}

/// One relay direction.
#[derive(Clone, Copy)]
struct Pump<'a> {
    direction: Direction,
    framer: &'a MessageFramer,
    info: &'a SessionInfo,
    control: &'a SessionControl,
    messages: &'a AtomicU64,
    emitter: &'a AuditEmitter,
}

impl Pump<'_> {
    async fn run<R, W>(self, inbound: &mut Inbound<R>, outbound: &mut Outbound<W>)
    where
        R: AsyncRead,
        W: AsyncWrite,
    {
        let mut pending = PendingMessage::new();

        loop {
            let framed = tokio::select! {
                _ = self.control.closing() => break,
                result = self.framer.next_message(inbound, &mut pending, || self.control.is_active()) => result,
            };

            let message = match framed {
                Ok(message) => message,
                Err(e) => {
                    if let FramingError::MessageTooLarge { limit, .. } = &e {
                        tracing::warn!(
                            session_id = %self.info.id,
                            direction = %self.direction,
                            limit,
                            "Message exceeds framing limit"
                        );
                    }
                    if let Some(reason) = CloseReason::from_framing(&e) {
                        self.control.begin_close(reason);
                    }
                    break;
                }
            };

            if !self.control.is_active() {
                break;
            }

            let send = outbound.send(&message);
            tokio::pin!(send);
            let sent = tokio::select! {
                result = &mut send => result,
                _ = self.control.closing() => match tokio::time::timeout(SEND_GRACE, &mut send).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(
                            session_id = %self.info.id,
                            direction = %self.direction,
                            bytes = message.len(),
                            "Abandoning write to stalled peer"
                        );
                        break;
                    }
                },
            };
            if let Err(e) = sent {
                self.control.begin_close(CloseReason::from_transport(&e));
                break;
            }

            self.messages.fetch_add(1, Ordering::Relaxed);
            metrics::record_message_forwarded(self.direction.as_str());
            tracing::trace!(
                session_id = %self.info.id,
                direction = %self.direction,
                bytes = message.len(),
                "Forwarded message"
            );

            self.emitter.emit(&Exchange {
                session: self.info,
                direction: self.direction,
                message: &message,
            });
        }

        if !pending.is_empty() {
            tracing::trace!(
                session_id = %self.info.id,
                direction = %self.direction,
                bytes = pending.len(),
                "Discarding unfinished message"
            );
        }
    }
}
