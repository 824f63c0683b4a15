//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! purpose:
//!     receives soil readings from a field device over http, keeps every one
//!     in an append-only log and streams them to open dashboards.
//!
//! responsibilities:
//!     - load configuration (hub.toml + PORT / DATA_PATH overrides)
//!     - open the reading store (json lines file)
//!     - construct the broadcast hub and hand it to the ingestion service
//!     - serve the api, the live websocket and the static dashboard
//!     - shut down cleanly on ctrl-c
//!
//! architecture:
//!
//!     ┌──────────┐ POST /api/sensor-data ┌──────────────────────────────┐
//!     │  device  │ ────────────────────▶ │ ingest: validate → append →  │
//!     └──────────┘ ◀──────── ack ─────── │         publish              │
//!                                        └──────┬───────────────┬───────┘
//!                                               │ append        │ publish
//!                                        ┌──────▼──────┐  ┌─────▼──────┐
//!                                        │ store       │  │ hub        │
//!                                        │ (jsonl log) │  │ (queues)   │
//!                                        └──────▲──────┘  └─────┬──────┘
//!                                               │ query         │ /api/live
//!     ┌───────────┐ GET /api/history     ┌──────┴──────┐        │
//!     │ dashboard │ ───────────────────▶ │ history     │        │
//!     │           │ ◀──────────────────────────────────────────┘
//!     └───────────┘
//!
//! ==============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sensor_hub::config::HubConfig;
use sensor_hub::server::{self, AppState};
use sensor_hub::store::JsonlStore;

#[derive(Debug, Parser)]
#[command(name = "sensor-hub", about = "Soil sensor ingestion and live dashboard hub")]
struct Args {
    /// Config file (defaults to config/hub.toml or ../config/hub.toml)
    #[arg(short, long, env = "HUB_CONFIG")]
    config: Option<PathBuf>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // step 1: load configuration
    let mut config = match &args.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::load_or_default(),
    };
    config.apply_env()?;

    // step 2: logging (RUST_LOG wins over the config file)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();
    config.print_summary();

    // step 3: open the store
    let store = JsonlStore::open(&config.storage.path, config.storage.fsync)
        .await
        .with_context(|| format!("failed to open reading store {}", config.storage.path.display()))?;

    // step 4: wire hub, ingestion and history around it
    let state = AppState::from_config(Arc::new(store), &config);
    let app = server::build_router(state, config.server.static_dir.as_deref());

    // step 5: serve until ctrl-c
    let addr = config.server.socket_addr()?;
    server::run_server(addr, app, shutdown_signal()).await?;

    tracing::info!("hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
