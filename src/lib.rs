//! Intercepting HTTP proxy library.

pub mod admin;
pub mod audit;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod session;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use server::ProxyServer;
pub use session::Session;
