//! # Control Plane - Agent Channel
//!
//! Registers remote clusters, authenticates their agents, ingests workflow
//! run progress, correlates pod log requests and fans cluster events out
//! to dashboard subscribers.
//!
//! ## Architecture
//! ```text
//! Agent ⇄ Control Plane ⇄ Dashboard subscribers
//!               ↓
//!         Redis (State)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod access_key;
mod broadcast;
mod config;
mod identity;
mod ingest;
mod logs;
mod registry;
mod routes;
mod state;
mod store;
mod teardown;

use config::{AppConfig, StorageBackend};
use logs::log_request_sweeper;
use state::AppState;

/// Control plane agent channel
#[derive(Parser, Debug)]
#[command(name = "control-plane")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/control-plane.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Storage backend (overrides config)
    #[arg(long, value_enum, env = "STORAGE_BACKEND")]
    storage: Option<StorageBackend>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before clap reads the environment
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting control plane v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, &args)?;
    info!(backend = ?config.storage.backend, "Configuration loaded from {}", args.config);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let state = AppState::new(config.clone()).await?;

    // Evict log requests whose waiter never cleaned up
    tokio::spawn(log_request_sweeper(
        state.pending_logs.clone(),
        config.log_requests.sweep_interval(),
        config.log_requests.ttl(),
        shutdown_tx.subscribe(),
    ));

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Control plane listening on {}", config.listen_addr);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Control plane shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}
