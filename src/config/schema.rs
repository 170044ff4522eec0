//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Upstream server every client session is paired with.
    pub upstream: UpstreamConfig,

    /// Message framing policy and limits.
    pub framing: FramingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Audit event pipeline.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Management API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:80".to_string(),
        }
    }
}

/// When a client-direction message counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestBoundary {
    /// Complete at the header terminator; trailing bytes of the same reads
    /// travel with it.
    #[default]
    HeaderTerminator,
    /// Same rule as responses: header terminator, then `Content-Length` bytes.
    DeclaredLength,
}

/// Framing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Bytes requested per read.
    pub chunk_size: usize,

    /// Boundary policy for requests.
    pub request_boundary: RequestBoundary,

    /// Largest message buffered before the session is closed.
    pub max_message_bytes: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            request_boundary: RequestBoundary::HeaderTerminator,
            max_message_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle read timeout per connection in seconds. 0 disables it.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        (self.idle_secs > 0).then(|| Duration::from_secs(self.idle_secs))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 300,
        }
    }
}

/// Audit pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit events at all.
    pub enabled: bool,

    /// Sorted-set namespace for access events.
    pub access_namespace: String,

    /// Sorted-set namespace for security events.
    pub security_namespace: String,

    /// Events buffered between the relay and the store writer.
    pub queue_capacity: usize,

    /// Drop events older than this many seconds on write. 0 keeps everything.
    pub retention_secs: u64,

    /// JSON snapshot of the in-process store, loaded at start and saved on shutdown.
    pub persistence_path: Option<String>,

    /// Attach the flagged message bytes to security events.
    pub capture_payloads: bool,
}

impl AuditConfig {
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_namespace: "access_events".to_string(),
            security_namespace: "security_events".to_string(),
            queue_capacity: 1024,
            retention_secs: 0,
            persistence_path: None,
            capture_payloads: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
