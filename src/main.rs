// =============================================================================
// Candle Session — Main Entry Point
// =============================================================================
//
// Streams live klines for one (symbol, interval) series at a time, keeps a
// per-series history that survives switching away and back, and serves the
// visible series over HTTP + WebSocket.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod controller;
mod error;
mod market_data;
mod runtime_config;
mod session;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::controller::AggregationController;
use crate::market_data::{BinanceKlineAdapter, BinanceKlineTransport};
use crate::runtime_config::RuntimeConfig;
use crate::session::{
    FileByteStore, JsonSeriesStore, MemoryByteStore, SeriesStore, SessionCache,
};

const DEFAULT_CONFIG_PATH: &str = "candle_session.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Session — starting up");

    let config_path = std::env::var("CANDLE_SESSION_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    let initial = config.initial_key()?;
    info!(
        series = %initial,
        persist = config.persist,
        max_candles = config.max_candles,
        "Configured startup series"
    );

    // ── 2. Storage & session cache ───────────────────────────────────────
    let store: Arc<dyn SeriesStore> = if config.persist {
        let bytes = FileByteStore::open(&config.data_dir)
            .with_context(|| format!("failed to open series store at {}", config.data_dir))?;
        Arc::new(JsonSeriesStore::new(bytes, config.max_candles))
    } else {
        warn!("Persistence disabled — series history lasts for this process only");
        Arc::new(JsonSeriesStore::new(
            MemoryByteStore::new(),
            config.max_candles,
        ))
    };
    let cache = SessionCache::new(store, config.max_candles);

    // ── 3. Transport & controller ────────────────────────────────────────
    let transport = Arc::new(BinanceKlineTransport::new(
        config.stream_base_url.clone(),
        Duration::from_secs(config.reconnect_delay_secs),
    ));
    let controller = Arc::new(AggregationController::new(
        Box::new(BinanceKlineAdapter),
        transport,
        cache,
    ));
    controller.bind_transport();

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, controller.clone());

    // Loading the initial series reads from disk.
    {
        let controller = controller.clone();
        tokio::task::spawn_blocking(move || controller.start(&initial))
            .await
            .context("startup subscription task failed")?;
    }

    // ── 4. Start the API server ──────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let resume = controller.current_key();
    {
        let controller = controller.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || controller.stop()).await {
            error!(error = %e, "Failed to stop aggregation cleanly");
        }
    }

    {
        let mut cfg = state.runtime_config.write();
        if let Some(key) = &resume {
            cfg.remember(key);
        }
        if let Err(e) = cfg.save(&config_path) {
            error!(error = %e, "Failed to save runtime config on shutdown");
        }
    }

    info!("Candle Session shut down complete.");
    Ok(())
}
