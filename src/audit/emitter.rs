//! Audit emitter.
//!
//! # Data Flow
//! ```text
//! Session relay (forwarded message)
//!     → Classifier (advisory verdict)
//!     → build_event (pure)
//!     → bounded queue (try_send, never waits)
//!     → AuditWriter task
//!     → EventManager::cache_event
//! ```
//!
//! # Design Decisions
//! - The relay never waits on the store; a full queue drops the event
//! - Store failures are absorbed by the writer and never reach a session
//! - An unreachable store at startup switches auditing off for the process

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audit::classifier::{Classifier, Exchange, Verdict};
use crate::audit::event::{AccessLog, Event, Log, MetadataValue, SecurityLog};
use crate::audit::manager::EventManager;
use crate::config::AuditConfig;
use crate::observability::metrics;

/// Build the event for one forwarded message.
///
/// The source on the log is always the client's address, whichever direction
/// the message travelled.
pub fn build_event(exchange: &Exchange<'_>, verdict: &Verdict, capture_payloads: bool) -> Event {
    let client = exchange.session.client_addr;
    let log = Log::new(client.ip().to_string(), client.port());

    match verdict {
        Verdict::Benign => Event::AuthorizedRequest(AccessLog { log }),
        Verdict::Flagged(flagged) => {
            let mut security = SecurityLog::new(log, flagged.classifiers.clone());
            security.geolocation = flagged.geolocation.clone();
            if capture_payloads {
                security.malicious_data = Some(exchange.message.to_vec());
            }
            let mut metadata = flagged.metadata.clone().unwrap_or_default();
            metadata
                .entry("direction".to_string())
                .or_insert_with(|| MetadataValue::from(exchange.direction.as_str()));
            metadata
                .entry("session_id".to_string())
                .or_insert_with(|| MetadataValue::from(exchange.session.id.to_string()));
            security.metadata = Some(metadata);
            Event::UnauthorizedRequest(security)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Enabled,
    Disabled,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditMode::Enabled => "enabled",
            AuditMode::Disabled => "disabled",
        }
    }
}

/// Per-session handle for handing events to the writer.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: Option<mpsc::Sender<Event>>,
    classifier: Arc<dyn Classifier>,
    capture_payloads: bool,
}

impl AuditEmitter {
    /// An emitter that records nothing.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            classifier: Arc::new(crate::audit::classifier::PassThrough),
            capture_payloads: false,
        }
    }

    pub fn mode(&self) -> AuditMode {
        if self.tx.is_some() {
            AuditMode::Enabled
        } else {
            AuditMode::Disabled
        }
    }

    /// Classify and enqueue one exchange. Never waits.
    pub fn emit(&self, exchange: &Exchange<'_>) {
        let Some(tx) = &self.tx else {
            return;
        };

        let verdict = self.classifier.classify(exchange);
        let event = build_event(exchange, &verdict, self.capture_payloads);
        let kind = event.kind();

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %exchange.session.id,
                    kind = kind.as_str(),
                    "Audit queue full, dropping event"
                );
                metrics::record_audit_dropped("queue_full");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(
                    session_id = %exchange.session.id,
                    kind = kind.as_str(),
                    "Audit writer stopped, dropping event"
                );
                metrics::record_audit_dropped("writer_stopped");
            }
        }
    }
}

/// Drains the audit queue into the event manager.
pub struct AuditWriter {
    rx: mpsc::Receiver<Event>,
    manager: Arc<EventManager>,
}

impl AuditWriter {
    /// Runs until every emitter has been dropped and the queue is empty.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let kind = event.kind();
            match self.manager.cache_event(&event) {
                Ok(()) => metrics::record_audit_event(kind.as_str()),
                Err(e) => {
                    tracing::warn!(kind = kind.as_str(), error = %e, "Failed to cache audit event");
                    metrics::record_audit_dropped("store_error");
                }
            }
        }
        tracing::debug!("Audit writer stopped");
    }
}

/// Build the emitter for this process, plus the writer to spawn when
/// auditing is on.
pub fn start_audit(
    config: &AuditConfig,
    manager: Arc<EventManager>,
    classifier: Arc<dyn Classifier>,
) -> (AuditEmitter, Option<AuditWriter>) {
    if !config.enabled {
        tracing::info!("Auditing disabled by configuration");
        return (AuditEmitter::disabled(), None);
    }
    if !manager.is_alive() {
        tracing::warn!("Event store unreachable, running with auditing disabled");
        return (AuditEmitter::disabled(), None);
    }

    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let emitter = AuditEmitter {
        tx: Some(tx),
        classifier,
        capture_payloads: config.capture_payloads,
    };
    (emitter, Some(AuditWriter { rx, manager }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::classifier::{Flagged, PassThrough};
    use crate::audit::event::{AttackClassifier, EventKind, Metadata};
    use crate::audit::store::{MemoryBackend, SortedSetBackend, StoreError};
    use crate::session::{Direction, SessionInfo};

    fn session() -> SessionInfo {
        SessionInfo::new("203.0.113.9:51000".parse().unwrap(), "127.0.0.1:80".parse().unwrap())
    }

    struct FlagEverything;

    impl Classifier for FlagEverything {
        fn classify(&self, _exchange: &Exchange<'_>) -> Verdict {
            Verdict::Flagged(Flagged::from(AttackClassifier::SqlInjection))
        }
    }

    struct Unreachable;

    impl SortedSetBackend for Unreachable {
        fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn zadd(&self, _: &str, _: String, _: i64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn zrange(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn prune_before(&self, _: &str, _: i64) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn memory_manager(config: &AuditConfig) -> Arc<EventManager> {
        Arc::new(EventManager::new(Arc::new(MemoryBackend::default()), config))
    }

    #[test]
    fn benign_exchange_becomes_access_event_from_client() {
        let session = session();
        let exchange = Exchange {
            session: &session,
            direction: Direction::ServerToClient,
            message: b"HTTP/1.1 200 OK\r\n\r\n",
        };
        let event = build_event(&exchange, &Verdict::Benign, true);

        assert_eq!(event.kind(), EventKind::AuthorizedRequest);
        assert_eq!(event.log().ip, "203.0.113.9");
        assert_eq!(event.log().port, 51000);
    }

    #[test]
    fn flagged_exchange_becomes_security_event() {
        let session = session();
        let exchange = Exchange {
            session: &session,
            direction: Direction::ClientToServer,
            message: b"GET /?id=1' OR 1=1 HTTP/1.1\r\n\r\n",
        };
        let mut flagged = Flagged::from(AttackClassifier::SqlInjection);
        let mut metadata = Metadata::new();
        metadata.insert("direction".into(), "overridden".into());
        flagged.metadata = Some(metadata);

        let Event::UnauthorizedRequest(log) = build_event(&exchange, &Verdict::Flagged(flagged.clone()), true) else {
            panic!("expected a security event");
        };
        assert_eq!(log.classifiers.as_slice(), &[AttackClassifier::SqlInjection]);
        assert_eq!(log.malicious_data.as_deref(), Some(exchange.message));
        let metadata = log.metadata.unwrap();
        assert_eq!(metadata["direction"], MetadataValue::from("overridden"));
        assert_eq!(metadata["session_id"], MetadataValue::from(session.id.to_string()));

        let Event::UnauthorizedRequest(log) = build_event(&exchange, &Verdict::Flagged(flagged), false) else {
            panic!("expected a security event");
        };
        assert!(log.malicious_data.is_none());
    }

    #[tokio::test]
    async fn emitted_events_reach_the_store() {
        let config = AuditConfig::default();
        let manager = memory_manager(&config);
        let (emitter, writer) = start_audit(&config, Arc::clone(&manager), Arc::new(FlagEverything));
        assert_eq!(emitter.mode(), AuditMode::Enabled);

        let session = session();
        emitter.emit(&Exchange {
            session: &session,
            direction: Direction::ClientToServer,
            message: b"GET / HTTP/1.1\r\n\r\n",
        });
        drop(emitter);
        writer.unwrap().run().await;

        assert_eq!(manager.get_security_events().unwrap().len(), 1);
        assert!(manager.get_access_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_without_waiting() {
        let config = AuditConfig {
            queue_capacity: 1,
            ..AuditConfig::default()
        };
        let manager = memory_manager(&config);
        let (emitter, writer) = start_audit(&config, Arc::clone(&manager), Arc::new(PassThrough));

        let session = session();
        let exchange = Exchange {
            session: &session,
            direction: Direction::ClientToServer,
            message: b"GET / HTTP/1.1\r\n\r\n",
        };
        for _ in 0..5 {
            emitter.emit(&exchange);
        }
        drop(emitter);
        writer.unwrap().run().await;

        assert_eq!(manager.get_access_events().unwrap().len(), 1);
    }

    #[test]
    fn unreachable_store_means_degraded_mode() {
        let config = AuditConfig::default();
        let manager = Arc::new(EventManager::new(Arc::new(Unreachable), &config));
        let (emitter, writer) = start_audit(&config, manager, Arc::new(PassThrough));
        assert_eq!(emitter.mode(), AuditMode::Disabled);
        assert!(writer.is_none());
    }

    #[test]
    fn configuration_can_switch_auditing_off() {
        let config = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        let (emitter, writer) = start_audit(&config, memory_manager(&config), Arc::new(PassThrough));
        assert_eq!(emitter.mode(), AuditMode::Disabled);
        assert!(writer.is_none());
    }
}
