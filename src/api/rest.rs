// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. This is the rendering collaborator's
// view of the aggregation core: read the visible series and latest price,
// list the offered markets, and request a series switch.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::controller::{ControllerPhase, IngestStats};
use crate::market_data::Candle;
use crate::types::{Interval, SeriesKey};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/series", get(series))
        .route("/api/v1/series/candles", get(candles))
        .route("/api/v1/series/latest-price", get(latest_price))
        .route("/api/v1/series/switch", post(switch_series))
        .route("/api/v1/markets", get(markets))
        .route("/api/v1/stats", get(stats))
        // ── WebSocket (handled in the ws module but mounted here) ───
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    phase: ControllerPhase,
    state_version: u64,
    server_time: i64,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        phase: state.controller.phase(),
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// =============================================================================
// Series
// =============================================================================

async fn series(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.controller.snapshot())
}

/// Bare candle array for clients that track key and price separately.
async fn candles(State(state): State<Arc<AppState>>) -> Json<Vec<Candle>> {
    Json(state.controller.visible_sequence())
}

#[derive(Serialize)]
struct LatestPriceResponse {
    key: Option<SeriesKey>,
    latest_price: Option<f64>,
}

async fn latest_price(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(LatestPriceResponse {
        key: state.controller.current_key(),
        latest_price: state.controller.latest_price(),
    })
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    symbol: String,
    interval: String,
}

async fn switch_series(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SwitchRequest>,
) -> axum::response::Response {
    let key = match SeriesKey::parse(&req.symbol, &req.interval) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "switch request rejected");
            return bad_request(e.to_string());
        }
    };
    if !state.runtime_config.read().offers(&key) {
        warn!(key = %key, "switch request for a series that is not offered");
        return bad_request(format!("series {key} is not offered"));
    }

    info!(key = %key, "switch requested");
    // The switch saves and loads series files; keep that off the reactor.
    let controller = state.controller.clone();
    let target = key.clone();
    if let Err(e) =
        tokio::task::spawn_blocking(move || controller.request_switch(&target)).await
    {
        warn!(key = %key, error = %e, "switch task failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "switch failed" })),
        )
            .into_response();
    }

    Json(state.controller.snapshot()).into_response()
}

// =============================================================================
// Markets & stats
// =============================================================================

#[derive(Serialize)]
struct MarketsResponse {
    symbols: Vec<String>,
    intervals: Vec<Interval>,
    current: Option<SeriesKey>,
}

async fn markets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (symbols, intervals) = {
        let cfg = state.runtime_config.read();
        (cfg.symbols.clone(), cfg.intervals.clone())
    };
    Json(MarketsResponse {
        symbols,
        intervals,
        current: state.controller.current_key(),
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<IngestStats> {
    Json(state.controller.stats())
}

// =============================================================================
// Tests
// =============================================================================
