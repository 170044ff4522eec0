//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (`session_id`, `peer_addr`, `reason`) over interpolated text
//! - Expected closures log at debug; limit violations and audit drops at warn

pub mod logging;
pub mod metrics;
