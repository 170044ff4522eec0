//! Registry of live sessions.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;

use crate::session::control::{CloseReason, SessionState};
use crate::session::controller::SessionHandle;
use crate::session::SessionId;

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub started_at: DateTime<Utc>,
    pub age_secs: i64,
    pub state: SessionState,
    pub client_to_server_bytes: u64,
    pub server_to_client_bytes: u64,
    pub messages_forwarded: u64,
}

impl SessionSnapshot {
    fn of(handle: &SessionHandle, now: DateTime<Utc>) -> Self {
        let info = handle.info();
        Self {
            id: info.id,
            client_addr: info.client_addr,
            server_addr: info.server_addr,
            started_at: info.started_at,
            age_secs: (now - info.started_at).num_seconds().max(0),
            state: handle.state(),
            client_to_server_bytes: handle.client_to_server_bytes(),
            server_to_client_bytes: handle.server_to_client_bytes(),
            messages_forwarded: handle.messages_forwarded(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    drained: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id(), handle);
    }

    pub fn deregister(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&id).map(|(_, handle)| handle);
        if self.sessions.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots of every live session, oldest first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let now = Utc::now();
        let mut snapshots: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| SessionSnapshot::of(entry.value(), now))
            .collect();
        snapshots.sort_by_key(|s| s.started_at);
        snapshots
    }

    /// Administrative close. Returns false if no such session is registered.
    pub fn close(&self, id: SessionId) -> bool {
        match self.sessions.get(&id) {
            Some(entry) => {
                if entry.value().close(CloseReason::Administrative) {
                    tracing::info!(session_id = %id, "Session closed by administrator");
                }
                true
            }
            None => false,
        }
    }

    /// Ask every session to stop. Returns how many were still active.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().close(reason))
            .count()
    }

    /// Wait until every session has deregistered. Returns false on timeout.
    pub async fn wait_empty(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.drained.notified();
                if self.sessions.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }
}
