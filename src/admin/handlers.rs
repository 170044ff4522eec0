use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::audit::{AuditMode, Event, StoreError};
use crate::session::{SessionId, SessionSnapshot};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_sessions: usize,
    pub audit: AuditMode,
}

#[derive(Serialize)]
pub struct CloseResponse {
    pub id: SessionId,
    pub closing: bool,
}

type ApiError = (StatusCode, String);

fn store_error(e: StoreError) -> ApiError {
    tracing::warn!(error = %e, "Admin event query failed");
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_sessions: state.registry.len(),
        audit: state.audit_mode,
    })
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.registry.list())
}

pub async fn close_session(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<CloseResponse>, ApiError> {
    let id: SessionId = id
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid session id: {id}")))?;

    if state.registry.close(id) {
        Ok(Json(CloseResponse { id, closing: true }))
    } else {
        Err((StatusCode::NOT_FOUND, format!("no session {id}")))
    }
}

pub async fn get_access_events(State(state): State<AdminState>) -> Result<Json<Vec<Event>>, ApiError> {
    state.events.get_access_events().map(Json).map_err(store_error)
}

pub async fn get_security_events(State(state): State<AdminState>) -> Result<Json<Vec<Event>>, ApiError> {
    state.events.get_security_events().map(Json).map_err(store_error)
}
