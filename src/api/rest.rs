// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. They mirror the widget operations so a
// browser-side datafeed can be a thin shim over HTTP:
//   GET /api/v1/health                          liveness + channel counts
//   GET /api/v1/config                          `onReady` capabilities
//   GET /api/v1/symbols?symbol=WIF/USDC         `resolveSymbol`
//   GET /api/v1/history?symbol&resolution&...   `getBars`
//   GET /api/v1/stream  (WebSocket)             `subscribeBars` / `unsubscribeBars`
//
// CORS is permissive; the widget is typically served from another origin.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::app_state::AppState;
use crate::datafeed::{HistoryMeta, PeriodParams};
use crate::error::FeedError;
use crate::market_data::Bar;
use crate::types::Resolution;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/config", get(config))
        .route("/api/v1/symbols", get(symbols))
        .route("/api/v1/history", get(history))
        .route("/api/v1/stream", get(crate::api::ws::stream_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health / configuration
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn config(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, FeedError> {
    let (tx, rx) = oneshot::channel();
    state.datafeed.on_ready(move |configuration| {
        let _ = tx.send(configuration);
    });
    let configuration = rx
        .await
        .map_err(|_| FeedError::Transport("onReady never answered".into()))?;
    Ok(Json(configuration))
}

// =============================================================================
// Symbols
// =============================================================================

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: Option<String>,
}

async fn symbols(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Result<impl IntoResponse, FeedError> {
    let symbol = query
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| FeedError::BadRequest("missing `symbol`".into()))?;
    let info = state.resolve(&symbol).await?;
    Ok(Json(info))
}

// =============================================================================
// History
// =============================================================================

#[derive(Deserialize)]
struct HistoryQuery {
    symbol: String,
    resolution: String,
    #[serde(default)]
    from: i64,
    #[serde(default)]
    to: i64,
    #[serde(default)]
    countback: u32,
    #[serde(default)]
    first_data_request: bool,
}

#[derive(Serialize)]
struct HistoryResponse {
    s: &'static str,
    bars: Vec<Bar>,
    meta: HistoryMeta,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, FeedError> {
    let resolution = Resolution::parse(&query.resolution)
        .ok_or_else(|| FeedError::UnsupportedResolution(query.resolution.clone()))?;
    let info = state.resolve(&query.symbol).await?;

    let period = PeriodParams {
        from: query.from,
        to: query.to,
        count_back: query.countback,
        first_data_request: query.first_data_request,
    };
    let outcome: Mutex<Option<Result<(Vec<Bar>, HistoryMeta), FeedError>>> = Mutex::new(None);
    state
        .datafeed
        .get_bars(
            &info,
            &query.resolution,
            period,
            |bars, meta| *outcome.lock() = Some(Ok((bars, meta))),
            |message| *outcome.lock() = Some(Err(FeedError::History(message))),
        )
        .await;
    let (bars, meta) = outcome
        .into_inner()
        .unwrap_or_else(|| Err(FeedError::History("getBars never answered".into())))?;
    debug!(symbol = %query.symbol, resolution = %resolution, bars = bars.len(), "history served");

    Ok(Json(HistoryResponse {
        s: if meta.no_data { "no_data" } else { "ok" },
        bars,
        meta,
    }))
}
