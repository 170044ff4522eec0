//! Duplex relay sessions.
//!
//! # Data Flow
//! ```text
//! client ──▶ request framer ──▶ forward to server ──▶ audit
//! client ◀── forward to client ◀── response framer ◀── server
//!                 │
//!                 ▼
//!        SessionControl (Active → Closing → Closed)
//! ```
//!
//! # Design Decisions
//! - Both directions run concurrently inside one task and share one control block
//! - The first failure anywhere closes both connections
//! - Live sessions are visible through the [`SessionRegistry`]

pub mod control;
pub mod controller;
pub mod registry;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use control::{CloseReason, SessionControl, SessionState};
pub use controller::{Session, SessionReport};
pub use registry::{SessionRegistry, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Immutable facts about a session, fixed when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub started_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(client_addr: SocketAddr, server_addr: SocketAddr) -> Self {
        Self {
            id: SessionId::new(),
            client_addr,
            server_addr,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
