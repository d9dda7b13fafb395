//! Pension portal API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id → trace → timeout
//!                         │
//!                         ▼
//!                  ┌──────────────┐
//!                  │   prepare    │  client address, strip identity headers, route lookup
//!                  ├──────────────┤
//!                  │  ip_filter   │
//!                  ├──────────────┤
//!                  │  sanitize    │
//!                  ├──────────────┤
//!                  │ rate (global)│
//!                  ├──────────────┤
//!                  │ authenticate │
//!                  ├──────────────┤
//!                  │access_control│──▶ audit log
//!                  ├──────────────┤
//!                  │ rate (route) │
//!                  └──────┬───────┘
//!                         ▼
//!               admin handlers / admitted
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use pension_gateway::config::loader::{from_env, load_config};
use pension_gateway::config::schema::AuthConfig;
use pension_gateway::config::watcher::ConfigWatcher;
use pension_gateway::lifecycle::Shutdown;
use pension_gateway::observability::{logging, metrics};
use pension_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "pension-gateway", version, about = "Pension portal API gateway")]
struct Args {
    /// TOML configuration file. Without one, defaults plus GATEWAY_* variables apply.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => from_env()?,
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pension-gateway starting");

    if config.auth.jwt_secret == AuthConfig::default().jwt_secret {
        tracing::warn!("Using the placeholder JWT secret; set GATEWAY_JWT_SECRET");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        rate_limit = config.rate_limit.enabled,
        ip_filter = config.ip_filter.enabled,
        sanitizer = config.sanitizer.enabled,
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

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    // Keep the watcher handle alive for the lifetime of the server.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => (tokio::sync::mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();

    shutdown.trigger_on_signal();

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
