//! HTTP message framing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound chunks (8 KiB reads)
//!     → framer.rs (accumulate until the direction's boundary)
//!     → headers.rs (header terminator, Content-Length)
//!     → complete message handed to the session relay
//! ```
//!
//! Only the subset of HTTP/1.x needed to find message boundaries is parsed.

pub mod framer;
pub mod headers;

pub use framer::{Boundary, FramingError, MessageFramer, PendingMessage, DEFAULT_CHUNK_SIZE};
pub use headers::MessageKind;
