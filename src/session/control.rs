//! Session state and close signalling.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use serde::Serialize;
use tokio::sync::watch;

use crate::http::FramingError;
use crate::net::{Peer, TransportError};

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// Why a session left `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    ClientClosed,
    ServerClosed,
    Transport { peer: Peer },
    IdleTimeout { peer: Peer },
    MessageTooLarge { peer: Peer },
    Administrative,
    Shutdown,
}

impl CloseReason {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ServerClosed => "server_closed",
            CloseReason::Transport { .. } => "transport",
            CloseReason::IdleTimeout { .. } => "idle_timeout",
            CloseReason::MessageTooLarge { .. } => "message_too_large",
            CloseReason::Administrative => "administrative",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Part of normal operation rather than a fault. A reset connection is
    /// how many clients leave.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            CloseReason::ClientClosed
                | CloseReason::ServerClosed
                | CloseReason::Transport { .. }
                | CloseReason::Administrative
                | CloseReason::Shutdown
        )
    }

    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::PeerClosed(Peer::Client) => CloseReason::ClientClosed,
            TransportError::PeerClosed(Peer::Server) => CloseReason::ServerClosed,
            TransportError::IdleTimeout(peer, _) => CloseReason::IdleTimeout { peer: *peer },
            TransportError::Io { peer, .. } => CloseReason::Transport { peer: *peer },
        }
    }

    /// `None` for cancellation, which only happens once a reason is already set.
    pub fn from_framing(err: &FramingError) -> Option<Self> {
        match err {
            FramingError::Transport(e) => Some(Self::from_transport(e)),
            FramingError::MessageTooLarge { peer, .. } => Some(CloseReason::MessageTooLarge { peer: *peer }),
            FramingError::Cancelled => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Transport { peer } | CloseReason::IdleTimeout { peer } | CloseReason::MessageTooLarge { peer } => {
                write!(f, "{} ({})", self.as_str(), peer)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Shared control block of one session.
///
/// The relay loops poll [`is_active`](Self::is_active) between chunks and
/// await [`closing`](Self::closing) while blocked on I/O. The first caller of
/// [`begin_close`](Self::begin_close) decides the close reason.
#[derive(Debug)]
pub struct SessionControl {
    state: AtomicU8,
    reason: OnceLock<CloseReason>,
    closing_tx: watch::Sender<bool>,
}

impl SessionControl {
    pub fn new() -> Self {
        let (closing_tx, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(ACTIVE),
            reason: OnceLock::new(),
            closing_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => SessionState::Active,
            CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Leave `Active`. Returns false if the session was already closing.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.state.store(CLOSING, Ordering::Release);
        self.closing_tx.send_replace(true);
        true
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Resolves once the session has left `Active`.
    pub async fn closing(&self) {
        let mut rx = self.closing_tx.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = rx.wait_for(|closing| *closing).await;
    }

    /// Both connections are closed.
    pub fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}
