//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Open event store → Start audit writer → Bind listeners → Accept
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close sessions → Drain → Persist → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: store first, then audit, then listeners
//! - Ordered shutdown: stop accept, drain, flush audit, persist
//! - Draining has a deadline; sessions still open after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{start, RunningProxy, StartupError};
