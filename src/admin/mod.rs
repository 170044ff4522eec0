pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::audit::{AuditMode, EventManager};
use crate::session::SessionRegistry;

/// Shared state behind the admin API.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<EventManager>,
    pub audit_mode: AuditMode,
}

impl AdminState {
    pub fn new(api_key: String, registry: Arc<SessionRegistry>, events: Arc<EventManager>, audit_mode: AuditMode) -> Self {
        Self {
            api_key: api_key.into(),
            registry,
            events,
            audit_mode,
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/sessions/{id}/close", post(close_session))
        .route("/admin/events/access", get(get_access_events))
        .route("/admin/events/security", get(get_security_events))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
