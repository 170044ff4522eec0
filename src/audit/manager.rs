//! Event cache manager.
//!
//! # Responsibilities
//! - Route each event kind to its namespace
//! - Score members by log timestamp so reads come back in time order
//! - Apply optional retention on write
//!
//! # Design Decisions
//! - Constructed explicitly and shared by `Arc`; there is no global instance
//! - The backend connection belongs to whoever builds the manager

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::audit::event::{Event, EventKind};
use crate::audit::store::{SortedSetBackend, StoreError};
use crate::config::AuditConfig;

pub struct EventManager {
    backend: Arc<dyn SortedSetBackend>,
    access_namespace: String,
    security_namespace: String,
    retention: Option<Duration>,
}

impl EventManager {
    pub fn new(backend: Arc<dyn SortedSetBackend>, config: &AuditConfig) -> Self {
        Self {
            backend,
            access_namespace: config.access_namespace.clone(),
            security_namespace: config.security_namespace.clone(),
            retention: config.retention(),
        }
    }

    /// Probe the backend.
    pub fn is_alive(&self) -> bool {
        self.backend.ping().is_ok()
    }

    fn namespace(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::AuthorizedRequest => &self.access_namespace,
            EventKind::UnauthorizedRequest => &self.security_namespace,
        }
    }

    /// Add an event to its namespace, scored by its creation time.
    pub fn cache_event(&self, event: &Event) -> Result<(), StoreError> {
        let namespace = self.namespace(event.kind());
        self.backend.zadd(namespace, event.to_json()?, event.log().score())?;

        if let Some(retention) = self.retention {
            let window = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
            let cutoff = Utc::now().timestamp_millis().saturating_sub(window);
            let pruned = self.backend.prune_before(namespace, cutoff)?;
            if pruned > 0 {
                tracing::debug!(namespace, pruned, "Expired audit events");
            }
        }
        Ok(())
    }

    /// Access events, oldest first.
    pub fn get_access_events(&self) -> Result<Vec<Event>, StoreError> {
        self.read(EventKind::AuthorizedRequest)
    }

    /// Security events, oldest first.
    pub fn get_security_events(&self) -> Result<Vec<Event>, StoreError> {
        self.read(EventKind::UnauthorizedRequest)
    }

    fn read(&self, kind: EventKind) -> Result<Vec<Event>, StoreError> {
        let namespace = self.namespace(kind);
        let members = self.backend.zrange(namespace)?;
        let events = members
            .iter()
            .filter_map(|raw| match Event::from_json(raw) {
                Ok(event) if event.kind() == kind => Some(event),
                Ok(event) => {
                    tracing::warn!(namespace, kind = event.kind().as_str(), "Skipping event stored under the wrong namespace");
                    None
                }
                Err(e) => {
                    tracing::warn!(namespace, error = %e, "Skipping unreadable audit event");
                    None
                }
            })
            .collect();
        Ok(events)
    }

    /// Flush the backend.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.backend.persist()
    }
}
