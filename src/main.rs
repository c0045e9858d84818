// =============================================================================
// Outcome Oracle — Main Entry Point
// =============================================================================
//
// Loads configuration, opens the persisted engine state and serves the REST
// adapter until Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod engine;
mod memory;
mod outcome_store;
mod pipeline;
mod runtime_config;
mod signals;
mod strategies;
mod trainer;
mod types;

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::engine::PredictionEngine;
use crate::runtime_config::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Outcome Oracle — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("ORACLE_CONFIG").unwrap_or_else(|_| "engine_config.json".into());
    let config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "Failed to load config, using defaults");
        let defaults = EngineConfig::default();
        if !Path::new(&config_path).exists() {
            if let Err(e) = defaults.save(&config_path) {
                warn!(error = %e, "Failed to write default config");
            }
        }
        defaults
    });
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid engine configuration");
        return Err(e);
    }

    info!(
        database = %config.database_path.display(),
        mode = ?config.training_mode,
        "Configuration loaded"
    );

    // ── 2. Build the engine ──────────────────────────────────────────────
    let engine = Arc::new(PredictionEngine::open(config)?);
    let stats = engine.stats();
    info!(
        trades = stats.total_trades,
        active = stats.active_trades,
        patterns = stats.patterns,
        "Engine state restored"
    );

    // ── 3. Start the API server ──────────────────────────────────────────
    let bind_addr =
        std::env::var("ORACLE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let app = api::rest::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await?;

    if engine.stats().training_in_progress {
        info!("Waiting for the running training pass");
        engine.wait_for_training();
    }

    info!("Outcome Oracle shut down complete.");
    Ok(())
}
