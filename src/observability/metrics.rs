//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_sessions_opened_total` (counter)
//! - `proxy_sessions_closed_total` (counter): by close reason
//! - `proxy_active_sessions` (gauge)
//! - `proxy_bytes_received_total` (counter): raw transport bytes by direction
//! - `proxy_messages_forwarded_total` (counter): by direction
//! - `proxy_audit_events_total` (counter): cached events by kind
//! - `proxy_audit_dropped_total` (counter): by drop reason
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    counter!("proxy_sessions_opened_total").increment(1);
    gauge!("proxy_active_sessions").increment(1.0);
}

pub fn record_session_closed(reason: &'static str) {
    counter!("proxy_sessions_closed_total", "reason" => reason).increment(1);
    gauge!("proxy_active_sessions").decrement(1.0);
}

pub fn record_bytes_received(direction: &'static str, bytes: u64) {
    counter!("proxy_bytes_received_total", "direction" => direction).increment(bytes);
}

pub fn record_message_forwarded(direction: &'static str) {
    counter!("proxy_messages_forwarded_total", "direction" => direction).increment(1);
}

pub fn record_audit_event(kind: &'static str) {
    counter!("proxy_audit_events_total", "kind" => kind).increment(1);
}

pub fn record_audit_dropped(reason: &'static str) {
    counter!("proxy_audit_dropped_total", "reason" => reason).increment(1);
}
