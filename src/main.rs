//! Intercepting HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────────┐
//!                   │                  INTERCEPT PROXY                     │
//!                   │                                                      │
//!   Client ────────▶│ listener ─▶ request framer ─▶ server connection ─────┼────▶ Upstream
//!                   │                 │                                    │
//!   Client ◀────────│ client conn ◀─ response framer ◀─ server connection ◀┼───── Upstream
//!                   │                 │                                    │
//!                   │                 ▼                                    │
//!                   │        audit emitter ─▶ writer ─▶ event manager      │
//!                   │                                                      │
//!                   │  config · logging · metrics · admin API · lifecycle  │
//!                   └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use intercept_proxy::audit::PassThrough;
use intercept_proxy::config::{load_config, ProxyConfig};
use intercept_proxy::lifecycle::{self, Shutdown};
use intercept_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "intercept-proxy")]
#[command(author, version, about = "Intercepting HTTP proxy with audit events", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "intercept-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        max_connections = config.listener.max_connections,
        request_boundary = ?config.framing.request_boundary,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    let proxy = match lifecycle::start(config, Arc::new(PassThrough), &shutdown).await {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };
    tracing::info!(address = %proxy.proxy_addr(), "Listening for connections");

    lifecycle::wait_for_signal().await;
    shutdown.trigger();
    proxy.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
