//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → upstream.rs (dial the paired upstream server)
//!     → connection.rs (byte transport, transfer counters, close)
//!     → Hand off to the session layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Connections never retry; failure always propagates to the session
//! - TLS interception is left to an outer bootstrap layer

pub mod connection;
pub mod listener;
pub mod upstream;

pub use connection::{Connection, Inbound, Outbound, Peer, TransferStats, TransportError};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use upstream::{connect_upstream, UpstreamError};
