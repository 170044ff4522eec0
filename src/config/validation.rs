//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges
//! - Catch audit namespace collisions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("framing.max_message_bytes ({max}) is smaller than framing.chunk_size ({chunk})")]
    MessageLimitBelowChunk { max: usize, chunk: usize },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("audit namespaces must differ (both are '{0}')")]
    NamespaceCollision(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_address(&mut errors, "upstream.address", &config.upstream.address);

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if config.framing.chunk_size == 0 {
        errors.push(ValidationError::Zero { field: "framing.chunk_size" });
    }
    if config.framing.max_message_bytes < config.framing.chunk_size {
        errors.push(ValidationError::MessageLimitBelowChunk {
            max: config.framing.max_message_bytes,
            chunk: config.framing.chunk_size,
        });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.connect_secs" });
    }

    let audit = &config.audit;
    if audit.queue_capacity == 0 {
        errors.push(ValidationError::Zero { field: "audit.queue_capacity" });
    }
    if audit.access_namespace.is_empty() {
        errors.push(ValidationError::Empty { field: "audit.access_namespace" });
    }
    if audit.security_namespace.is_empty() {
        errors.push(ValidationError::Empty { field: "audit.security_namespace" });
    }
    if !audit.access_namespace.is_empty() && audit.access_namespace == audit.security_namespace {
        errors.push(ValidationError::NamespaceCollision(audit.access_namespace.clone()));
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::Empty { field: "admin.api_key" });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
