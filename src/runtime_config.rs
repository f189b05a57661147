// =============================================================================
// Runtime Configuration — provider endpoints, quoting and stream tuning
// =============================================================================
//
// Loaded once at startup from an optional JSON file. All fields carry
// `#[serde(default)]` so that a partial (or empty) file still loads. The Codex
// API key never lives in the file: it is read from `CODEX_API_KEY` and is
// never serialised or logged.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stream::StreamSettings;
use crate::types::{QuoteCurrency, QuoteToken, StreamKind};

/// Solana network id on Codex.
pub const SOLANA_NETWORK_ID: u64 = 1_399_811_149;

pub const SOLANA_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Raydium AMM v4 program, as reported in a pair's `exchangeHash`.
pub const RAYDIUM_AMM_ADDRESS: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
/// Raydium concentrated-liquidity program.
pub const RAYDIUM_CLMM_ADDRESS: &str = "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_http_url() -> String {
    "https://graph.codex.io/graphql".to_string()
}

fn default_ws_url() -> String {
    "wss://graph.codex.io/graphql".to_string()
}

fn default_network_id() -> u64 {
    SOLANA_NETWORK_ID
}

fn default_countback() -> u32 {
    100
}

fn default_history_secs() -> i64 {
    24 * 60 * 60
}

fn default_quote_symbol() -> String {
    "USDC".to_string()
}

fn default_exchange() -> String {
    "Solana".to_string()
}

fn default_token_addresses() -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "WIF".to_string(),
        "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm".to_string(),
    );
    map.insert("SOL".to_string(), SOLANA_MINT.to_string());
    map.insert("USDC".to_string(), USDC_MINT.to_string());
    map
}

fn default_pair_exchanges() -> Vec<String> {
    vec![RAYDIUM_AMM_ADDRESS.to_string(), RAYDIUM_CLMM_ADDRESS.to_string()]
}

fn default_exchanges() -> Vec<ExchangeInfo> {
    ["Pump.fun", "Raydium"]
        .into_iter()
        .map(|name| ExchangeInfo {
            value: name.to_string(),
            name: name.to_string(),
            desc: name.to_string(),
        })
        .collect()
}

// =============================================================================
// ExchangeInfo
// =============================================================================

/// One entry of the exchange catalog advertised to the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub value: String,
    pub name: String,
    pub desc: String,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Provider -----------------------------------------------------------

    /// Codex API key, from `CODEX_API_KEY` only.
    #[serde(skip)]
    pub api_key: String,

    /// GraphQL endpoint for queries.
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// GraphQL endpoint for push subscriptions (`graphql-transport-ws`).
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Network every resolved instrument lives on.
    #[serde(default = "default_network_id")]
    pub network_id: u64,

    // --- Quoting ------------------------------------------------------------

    /// Which quoted aggregate (token or USD) feeds live bars.
    #[serde(default)]
    pub quote_currency: QuoteCurrency,

    /// Which side of the pair quotes prices.
    #[serde(default)]
    pub quote_token: QuoteToken,

    // --- Streaming ----------------------------------------------------------

    /// Unconfirmed (in-progress snapshots) or confirmed (closed bars) stream.
    #[serde(default)]
    pub stream_kind: StreamKind,

    /// Window in milliseconds for coalescing bursts of updates on a channel.
    /// 0 dispatches every update immediately.
    #[serde(default)]
    pub coalesce_window_ms: u64,

    // --- History ------------------------------------------------------------

    /// Maximum bars requested per history query.
    #[serde(default = "default_countback")]
    pub countback: u32,

    /// Look-back used when the widget sends no `from`.
    #[serde(default = "default_history_secs")]
    pub default_history_secs: i64,

    // --- Symbols ------------------------------------------------------------

    /// Quote symbol assumed when a symbol name has none (`WIF` → `WIF/USDC`).
    #[serde(default = "default_quote_symbol")]
    pub default_quote_symbol: String,

    /// Exchange assumed when a symbol name has none.
    #[serde(default = "default_exchange")]
    pub default_exchange: String,

    /// Ticker → token address overrides consulted before searching Codex.
    #[serde(default = "default_token_addresses")]
    pub token_addresses: HashMap<String, String>,

    /// Exchange program hashes whose pools may back a symbol's stream. The
    /// deepest such pool (by pooled token0) is chosen.
    #[serde(default = "default_pair_exchanges")]
    pub pair_exchanges: Vec<String>,

    /// Exchange catalog advertised by `onReady`.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeInfo>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            http_url: default_http_url(),
            ws_url: default_ws_url(),
            network_id: default_network_id(),
            quote_currency: QuoteCurrency::default(),
            quote_token: QuoteToken::default(),
            stream_kind: StreamKind::default(),
            coalesce_window_ms: 0,
            countback: default_countback(),
            default_history_secs: default_history_secs(),
            default_quote_symbol: default_quote_symbol(),
            default_exchange: default_exchange(),
            token_addresses: default_token_addresses(),
            pair_exchanges: default_pair_exchanges(),
            exchanges: default_exchanges(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            network_id = config.network_id,
            quote = %config.quote_currency,
            stream_kind = %config.stream_kind,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply `CODEX_API_KEY` and endpoint overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("CODEX_API_KEY") {
            self.api_key = key.trim().to_string();
        }
        if let Ok(url) = std::env::var("CODEX_HTTP_URL") {
            self.http_url = url;
        }
        if let Ok(url) = std::env::var("CODEX_WS_URL") {
            self.ws_url = url;
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            stream_kind: self.stream_kind,
            quote_token: self.quote_token,
            quote_currency: self.quote_currency,
            coalesce_window: (self.coalesce_window_ms > 0)
                .then(|| Duration::from_millis(self.coalesce_window_ms)),
        }
    }
}
