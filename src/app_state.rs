// =============================================================================
// Shared Application State
// =============================================================================
//
// Handed to every axum handler as `Arc<AppState>`. The datafeed owns the
// multiplexer; everything else here is read-mostly bookkeeping for `/health`.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::datafeed::{parse_symbol, Datafeed, SymbolInfo};
use crate::error::FeedError;
use crate::runtime_config::RuntimeConfig;
use crate::stream::ChannelSummary;

/// Resolved-symbol cache capacity. The cache is emptied when it fills.
const MAX_RESOLVED_SYMBOLS: usize = 512;

pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub datafeed: Datafeed,
    started_at: Instant,
    /// `EXCHANGE:FROM/TO` → resolved metadata, so history and stream
    /// requests do not repeat the lookups. Every spelling of one symbol
    /// shares an entry.
    resolved: RwLock<HashMap<String, SymbolInfo>>,
    /// Open `/api/v1/stream` sockets.
    stream_clients: AtomicU64,
}

/// Body of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub channels: usize,
    pub subscriptions: Vec<ChannelSummary>,
    pub stream_clients: u64,
    pub server_time: i64,
}

impl AppState {
    pub fn new(config: Arc<RuntimeConfig>, datafeed: Datafeed) -> Self {
        Self {
            config,
            datafeed,
            started_at: Instant::now(),
            resolved: RwLock::new(HashMap::new()),
            stream_clients: AtomicU64::new(0),
        }
    }

    /// Resolve `symbol` through the widget's `resolveSymbol`, reusing an
    /// earlier successful resolution of the same symbol. Failures are not
    /// cached.
    pub async fn resolve(&self, symbol: &str) -> Result<SymbolInfo, FeedError> {
        let name = symbol.trim();
        let key = parse_symbol(
            name,
            &self.config.default_quote_symbol,
            &self.config.default_exchange,
        )
        .map(|parts| format!("{}:{}/{}", parts.exchange, parts.from_symbol, parts.to_symbol));

        if let Some(key) = &key {
            let cached = self.resolved.read().get(key).cloned();
            if let Some(mut info) = cached {
                info.full_name = name.to_string();
                return Ok(info);
            }
        }

        let outcome = Mutex::new(Err(FeedError::Resolve));
        self.datafeed
            .resolve_symbol(
                name,
                |info| *outcome.lock() = Ok(info),
                |message| debug!(symbol = %name, message = %message, "resolveSymbol failed"),
            )
            .await;
        let info = outcome.into_inner()?;

        if let Some(key) = key {
            self.remember(key, info.clone());
        }
        Ok(info)
    }

    fn remember(&self, key: String, info: SymbolInfo) {
        let mut resolved = self.resolved.write();
        if resolved.len() >= MAX_RESOLVED_SYMBOLS && !resolved.contains_key(&key) {
            debug!(entries = resolved.len(), "resolved-symbol cache full, clearing");
            resolved.clear();
        }
        resolved.insert(key, info);
    }

    pub fn client_connected(&self) -> u64 {
        self.stream_clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_disconnected(&self) {
        self.stream_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            uptime_secs: self.started_at.elapsed().as_secs(),
            channels: self.datafeed.multiplexer().channel_count(),
            subscriptions: self.datafeed.multiplexer().channel_summaries(),
            stream_clients: self.stream_clients.load(Ordering::Relaxed),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}
