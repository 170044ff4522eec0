//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the event store and start the audit writer
//! - Bind the proxy listener and, when enabled, the admin API
//! - Run until shutdown, then drain sessions, stop the writer and persist events
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{self, AdminState};
use crate::audit::{start_audit, Classifier, EventManager, MemoryBackend, StoreError};
use crate::config::{validate_config, ProxyConfig, ValidationError};
use crate::lifecycle::shutdown::{self, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::server::{ProxyServer, DRAIN_TIMEOUT};
use crate::session::SessionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ValidationError>),
    #[error("invalid {field} address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to bind admin API: {0}")]
    Admin(std::io::Error),
    #[error("failed to open event store: {0}")]
    Store(#[from] StoreError),
}

/// A started proxy.
pub struct RunningProxy {
    proxy_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventManager>,
    task: JoinHandle<()>,
}

impl RunningProxy {
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn events(&self) -> Arc<EventManager> {
        Arc::clone(&self.events)
    }

    /// Wait for shutdown to finish, including the final persist.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Proxy task failed");
        }
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn open_store(path: Option<&str>) -> Result<MemoryBackend, StoreError> {
    match path {
        Some(path) => MemoryBackend::load_from_file(Path::new(path)),
        None => Ok(MemoryBackend::new(None)),
    }
}

/// Bring every subsystem up and run it in the background until `shutdown`.
pub async fn start(
    config: ProxyConfig,
    classifier: Arc<dyn Classifier>,
    shutdown: &Shutdown,
) -> Result<RunningProxy, StartupError> {
    validate_config(&config).map_err(StartupError::Config)?;
    let upstream = parse_addr("upstream", &config.upstream.address)?;

    let backend = open_store(config.audit.persistence_path.as_deref())?;
    let events = Arc::new(EventManager::new(Arc::new(backend), &config.audit));
    let (emitter, writer) = start_audit(&config.audit, Arc::clone(&events), classifier);
    let audit_mode = emitter.mode();
    let writer = writer.map(|writer| tokio::spawn(writer.run()));

    let registry = Arc::new(SessionRegistry::new());

    let listener = Listener::bind(&config.listener).await?;
    let proxy_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    let admin_addr = if config.admin.enabled {
        let bind = parse_addr("admin", &config.admin.bind_address)?;
        let admin_listener = TcpListener::bind(bind).await.map_err(StartupError::Admin)?;
        let admin_addr = admin_listener.local_addr().map_err(StartupError::Admin)?;
        let state = AdminState::new(
            config.admin.api_key.clone(),
            Arc::clone(&registry),
            Arc::clone(&events),
            audit_mode,
        );
        let router = admin::setup_admin_router(state);
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            tracing::info!(address = %admin_addr, "Admin API listening");
            let served = axum::serve(admin_listener, router)
                .with_graceful_shutdown(shutdown::wait_for(admin_shutdown))
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
        Some(admin_addr)
    } else {
        None
    };

    let server = ProxyServer::new(upstream, &config, Arc::clone(&registry), emitter);
    let server_shutdown = shutdown.subscribe();
    let store = Arc::clone(&events);
    let task = tokio::spawn(async move {
        if let Err(e) = server.run(listener, server_shutdown).await {
            tracing::error!(error = %e, "Proxy server stopped with error");
        }
        // The queue closes once the last session drops its emitter.
        if let Some(mut writer) = writer {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Audit writer failed"),
                Err(_) => {
                    tracing::warn!("Audit writer still busy after drain timeout, stopping it");
                    writer.abort();
                }
            }
        }
        if let Err(e) = store.persist() {
            tracing::error!(error = %e, "Failed to persist audit events");
        }
    });

    Ok(RunningProxy {
        proxy_addr,
        admin_addr,
        registry,
        events,
        task,
    })
}
