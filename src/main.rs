// =============================================================================
// chartfeed — Main Entry Point
// =============================================================================
//
// Bridges a TradingView-style charting widget to the Codex market-data API:
// historical bars over GraphQL/HTTP, live bars over one shared
// `graphql-transport-ws` connection, fanned out to any number of chart series
// through the subscription multiplexer.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod codex;
mod datafeed;
mod error;
mod market_data;
mod runtime_config;
mod stream;
mod transport;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::codex::{CodexClient, CodexTransport, GraphqlWsClient};
use crate::datafeed::Datafeed;
use crate::runtime_config::RuntimeConfig;
use crate::stream::Multiplexer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("chartfeed starting up");

    let config_path =
        std::env::var("CHARTFEED_CONFIG").unwrap_or_else(|_| "chartfeed_config.json".into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();

    if config.api_key.is_empty() {
        warn!("CODEX_API_KEY is not set; Codex requests will be rejected");
    }
    let config = Arc::new(config);

    // ── 2. Codex collaborators ───────────────────────────────────────────
    let http = CodexClient::new(
        config.http_url.clone(),
        &config.api_key,
        config.network_id,
        config.token_addresses.clone(),
    )?;
    let ws = GraphqlWsClient::spawn(config.ws_url.clone(), config.api_key.clone());
    let transport = Arc::new(CodexTransport::new(http.clone(), ws));

    // ── 3. Streaming core & datafeed ─────────────────────────────────────
    let multiplexer = Multiplexer::new(transport.clone(), config.stream_settings());
    let datafeed = Datafeed::new(
        config.clone(),
        transport.clone(),
        Arc::new(http),
        multiplexer.clone(),
    );
    let state = Arc::new(AppState::new(config.clone(), datafeed));

    info!(
        network_id = config.network_id,
        stream_kind = %config.stream_kind,
        quote = %config.quote_currency,
        coalesce_window_ms = config.coalesce_window_ms,
        "datafeed ready"
    );

    // ── 4. API server ────────────────────────────────────────────────────
    let bind_addr =
        std::env::var("CHARTFEED_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    multiplexer.close_all();
    info!(
        upstream_remaining = transport.active_subscriptions(),
        "chartfeed shut down complete."
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    warn!("Shutdown signal received, stopping gracefully");
}
