//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! forwarded message
//!     → classifier.rs (benign or flagged)
//!     → emitter.rs (build event, bounded queue, writer task)
//!     → manager.rs (namespace by kind, score by timestamp)
//!     → store.rs (sorted sets, optional snapshot file)
//! ```

pub mod classifier;
pub mod emitter;
pub mod event;
pub mod manager;
pub mod store;

pub use classifier::{Classifier, Exchange, Flagged, PassThrough, Verdict};
pub use emitter::{build_event, start_audit, AuditEmitter, AuditMode, AuditWriter};
pub use event::{
    AccessLog, AttackClassifier, ClassifierSet, Event, EventError, EventKind, GeoData, Log, Metadata,
    MetadataValue, SecurityLog,
};
pub use manager::EventManager;
pub use store::{MemoryBackend, SortedSetBackend, StoreError};
