// =============================================================================
// Datafeed — the charting widget's callback contract
// =============================================================================
//
// The widget drives five entry points: `on_ready`, `resolve_symbol`,
// `get_bars`, `subscribe_bars` and `unsubscribe_bars`. Each one is backed by
// an internal `Result`-returning operation (`configuration`, `resolve`,
// `history`, `subscribe`) and adapted to success / error callbacks only here,
// at the boundary. The HTTP and WebSocket handlers in `crate::api` go through
// the callback entry points, exactly as a browser-side datafeed would.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::codex::queries::{bars_payload, BarsQuery};
use crate::error::FeedError;
use crate::market_data::{transform_bars, Bar, ChannelKey};
use crate::runtime_config::{ExchangeInfo, RuntimeConfig};
use crate::stream::{BarCallback, Multiplexer, ResetCallback};
use crate::transport::{SymbolLookup, TradingPair, Transport};
use crate::types::Resolution;

// ---------------------------------------------------------------------------
// Widget-facing types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolType {
    pub name: String,
    pub value: String,
}

/// Capabilities handed to `onReady`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub supported_resolutions: Vec<String>,
    pub exchanges: Vec<ExchangeInfo>,
    pub symbols_types: Vec<SymbolType>,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
}

/// Resolved instrument description (the widget's `LibrarySymbolInfo`), plus
/// the instrument identity needed to open a channel without re-resolving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub full_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub listed_exchange: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_intraday: bool,
    pub has_seconds: bool,
    pub has_daily: bool,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
    pub format: String,
    /// Token address.
    pub address: String,
    /// Pool whose bars back this symbol, for history and live updates.
    pub pair_address: String,
    pub network_id: u64,
}

impl SymbolInfo {
    pub fn channel(&self, resolution: Resolution) -> ChannelKey {
        ChannelKey::new(self.pair_address.clone(), self.network_id, resolution)
    }
}

/// Requested history window, in UNIX seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodParams {
    #[serde(default)]
    pub from: i64,
    #[serde(default)]
    pub to: i64,
    #[serde(default)]
    pub count_back: u32,
    #[serde(default)]
    pub first_data_request: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMeta {
    pub no_data: bool,
}

/// `EXCHANGE:FROM/TO` split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParts {
    pub exchange: String,
    pub from_symbol: String,
    pub to_symbol: String,
}

/// Parse `EXCHANGE:FROM/TO`, `FROM/TO` or bare `FROM`, filling the gaps with
/// the configured defaults. Returns `None` for an empty or malformed name.
pub fn parse_symbol(name: &str, default_quote: &str, default_exchange: &str) -> Option<SymbolParts> {
    let name = name.trim();
    let (exchange, pair) = match name.split_once(':') {
        Some((exchange, pair)) => (exchange.trim(), pair),
        None => (default_exchange, name),
    };
    let (from, to) = match pair.split_once('/') {
        Some((from, to)) => (from.trim(), to.trim()),
        None => (pair.trim(), default_quote),
    };

    let valid = |s: &str| !s.is_empty() && !s.contains(char::is_whitespace) && !s.contains(['/', ':']);
    if !valid(exchange) || !valid(from) || !valid(to) {
        return None;
    }

    Some(SymbolParts {
        exchange: exchange.to_string(),
        from_symbol: from.to_string(),
        to_symbol: to.to_string(),
    })
}

/// The deepest pool (by pooled token0) among those on an allowed exchange.
/// Pools on other exchanges are never chosen.
pub fn select_pair<'a>(pairs: &'a [TradingPair], exchanges: &[String]) -> Option<&'a TradingPair> {
    pairs
        .iter()
        .filter(|p| exchanges.iter().any(|e| *e == p.exchange_hash))
        .max_by(|a, b| a.pooled_token0.total_cmp(&b.pooled_token0))
}

fn history_message(err: &FeedError) -> String {
    match err {
        FeedError::Transport(msg) => format!("Failed to load bars. Error: {msg}"),
        other => format!("Failed to load bars. Error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Datafeed
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Datafeed {
    config: Arc<RuntimeConfig>,
    transport: Arc<dyn Transport>,
    lookup: Arc<dyn SymbolLookup>,
    multiplexer: Multiplexer,
}

impl Datafeed {
    pub fn new(
        config: Arc<RuntimeConfig>,
        transport: Arc<dyn Transport>,
        lookup: Arc<dyn SymbolLookup>,
        multiplexer: Multiplexer,
    ) -> Self {
        Self {
            config,
            transport,
            lookup,
            multiplexer,
        }
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    // -------------------------------------------------------------------------
    // Internal operations
    // -------------------------------------------------------------------------

    pub fn configuration(&self) -> Configuration {
        Configuration {
            supported_resolutions: Resolution::supported_widget_strs(),
            exchanges: self.config.exchanges.clone(),
            symbols_types: vec![SymbolType {
                name: "crypto".into(),
                value: "crypto".into(),
            }],
            supports_marks: false,
            supports_timescale_marks: false,
            supports_time: true,
        }
    }

    /// Resolve a symbol name to full widget metadata. Any lookup failure,
    /// including a malformed name, is reported as [`FeedError::Resolve`].
    #[instrument(skip(self), name = "datafeed::resolve")]
    pub async fn resolve(&self, symbol_name: &str) -> Result<SymbolInfo, FeedError> {
        let parts = parse_symbol(
            symbol_name,
            &self.config.default_quote_symbol,
            &self.config.default_exchange,
        )
        .ok_or_else(|| {
            warn!(symbol = %symbol_name, "malformed symbol name");
            FeedError::Resolve
        })?;

        let address = self.lookup.lookup_address(&parts.from_symbol).await.map_err(|e| {
            warn!(symbol = %symbol_name, error = %e, "address lookup failed");
            FeedError::Resolve
        })?;
        let meta = self
            .lookup
            .lookup_instrument_metadata(&address)
            .await
            .map_err(|e| {
                warn!(symbol = %symbol_name, address = %address, error = %e, "metadata lookup failed");
                FeedError::Resolve
            })?;

        let pricescale = 10u64.checked_pow(meta.decimals).ok_or_else(|| {
            warn!(symbol = %symbol_name, decimals = meta.decimals, "price scale out of range");
            FeedError::Resolve
        })?;

        let pairs = self
            .lookup
            .list_pairs_for_token(&meta.address)
            .await
            .map_err(|e| {
                warn!(symbol = %symbol_name, address = %meta.address, error = %e, "pair lookup failed");
                FeedError::Resolve
            })?;
        let pair_address = match select_pair(&pairs, &self.config.pair_exchanges) {
            Some(pair) => pair.address.clone(),
            None => {
                warn!(
                    symbol = %symbol_name,
                    address = %meta.address,
                    listed = pairs.len(),
                    "no pool on a configured exchange, keying bars by token"
                );
                meta.address.clone()
            }
        };

        info!(
            symbol = %symbol_name,
            ticker = ?meta.symbol,
            address = %meta.address,
            pair = %pair_address,
            decimals = meta.decimals,
            exchanges = ?meta.exchanges,
            "symbol resolved"
        );

        Ok(SymbolInfo {
            name: format!("{}/{}", parts.from_symbol, parts.to_symbol),
            full_name: symbol_name.trim().to_string(),
            description: meta.name.clone().unwrap_or_default(),
            symbol_type: "crypto".into(),
            session: "24x7".into(),
            timezone: "Etc/UTC".into(),
            exchange: parts.exchange.clone(),
            listed_exchange: parts.exchange,
            minmov: 1,
            pricescale,
            has_intraday: true,
            has_seconds: true,
            has_daily: true,
            has_weekly_and_monthly: true,
            supported_resolutions: Resolution::supported_widget_strs(),
            volume_precision: 2,
            data_status: "streaming".into(),
            format: "price".into(),
            address: meta.address,
            pair_address,
            network_id: self.config.network_id,
        })
    }

    /// Fetch historical bars. An empty result is `no_data`, not an error.
    ///
    /// `to = 0` means now. `from = 0` means `count_back` intervals before
    /// `to`, or `default_history_secs` when `count_back` is also 0. The
    /// request asks for `count_back` bars, falling back to the configured
    /// countback.
    #[instrument(skip(self, symbol_info), fields(symbol = %symbol_info.name), name = "datafeed::history")]
    pub async fn history(
        &self,
        symbol_info: &SymbolInfo,
        resolution: Resolution,
        period: PeriodParams,
    ) -> Result<(Vec<Bar>, HistoryMeta), FeedError> {
        let to = if period.to > 0 {
            period.to
        } else {
            chrono::Utc::now().timestamp()
        };
        let from = if period.from > 0 {
            period.from
        } else if period.count_back > 0 {
            to.saturating_sub(i64::from(period.count_back).saturating_mul(resolution.seconds()))
        } else {
            to.saturating_sub(self.config.default_history_secs)
        };
        let countback = if period.count_back > 0 {
            period.count_back
        } else {
            self.config.countback
        };
        debug!(from, to, countback, first_data_request = period.first_data_request, "history window");

        let query = BarsQuery {
            pair_id: symbol_info.channel(resolution).pair_id(),
            resolution,
            from,
            to,
            countback,
            quote_token: self.config.quote_token,
            quote_currency: self.config.quote_currency,
        };

        let data = self
            .transport
            .query(query.request())
            .await
            .map_err(|e| {
                warn!(error = %e, from, to, "getBars query failed");
                FeedError::transport(&e)
            })?;

        let bars = transform_bars(bars_payload(&data));
        debug!(bars = bars.len(), from, to, resolution = %resolution, "history loaded");
        let meta = HistoryMeta {
            no_data: bars.is_empty(),
        };
        Ok((bars, meta))
    }

    /// Attach a consumer to the channel for `symbol_info` at `resolution`.
    pub fn subscribe(
        &self,
        symbol_info: &SymbolInfo,
        resolution: Resolution,
        subscriber_uid: &str,
        on_tick: BarCallback,
        on_reset_cache_needed: Option<ResetCallback>,
    ) -> Result<(), FeedError> {
        let key = symbol_info.channel(resolution);
        self.multiplexer
            .subscribe_with_reset(&key, subscriber_uid, on_tick, on_reset_cache_needed)
    }

    // -------------------------------------------------------------------------
    // Widget callback boundary
    // -------------------------------------------------------------------------

    /// The widget requires `onReady` to answer asynchronously.
    pub fn on_ready(&self, callback: impl FnOnce(Configuration) + Send + 'static) {
        let configuration = self.configuration();
        tokio::spawn(async move { callback(configuration) });
    }

    pub async fn resolve_symbol(
        &self,
        symbol_name: &str,
        on_resolved: impl FnOnce(SymbolInfo),
        on_error: impl FnOnce(String),
    ) {
        match self.resolve(symbol_name).await {
            Ok(info) => on_resolved(info),
            Err(e) => on_error(e.to_string()),
        }
    }

    pub async fn get_bars(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        period: PeriodParams,
        on_history: impl FnOnce(Vec<Bar>, HistoryMeta),
        on_error: impl FnOnce(String),
    ) {
        let result = match Resolution::parse(resolution) {
            Some(res) => self.history(symbol_info, res, period).await,
            None => Err(FeedError::UnsupportedResolution(resolution.to_string())),
        };
        match result {
            Ok((bars, meta)) => on_history(bars, meta),
            Err(e) => on_error(history_message(&e)),
        }
    }

    /// Returns the failure as well as logging it: the widget's
    /// `subscribeBars` has no error callback.
    pub fn subscribe_bars(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        on_tick: impl Fn(Bar) + Send + Sync + 'static,
        subscriber_uid: &str,
        on_reset_cache_needed: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), FeedError> {
        let resolution = Resolution::parse(resolution)
            .ok_or_else(|| FeedError::UnsupportedResolution(resolution.to_string()))?;
        self.subscribe(
            symbol_info,
            resolution,
            subscriber_uid,
            Arc::new(on_tick),
            Some(Arc::new(on_reset_cache_needed)),
        )
        .map_err(|e| {
            warn!(symbol = %symbol_info.name, uid = %subscriber_uid, error = %e, "subscribeBars failed");
            e
        })
    }

    pub fn unsubscribe_bars(&self, subscriber_uid: &str) {
        self.multiplexer.unsubscribe_consumer(subscriber_uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::{RAYDIUM_AMM_ADDRESS, RAYDIUM_CLMM_ADDRESS};
    use crate::stream::StreamSettings;
    use crate::transport::{GraphqlRequest, InstrumentMetadata, SubscriptionSink, UpstreamHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WIF: &str = "EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm";
    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const WIF_POOL: &str = "EP2ib6dYdEeqD8MfE2ezHCxX3kP3K2eLKkirfPm5eyMx";

    #[derive(Default)]
    struct MockTransport {
        response: Mutex<Option<anyhow::Result<Value>>>,
        queries: Mutex<Vec<GraphqlRequest>>,
        subscriptions: Mutex<Vec<GraphqlRequest>>,
        opened: AtomicUsize,
        released: Arc<AtomicUsize>,
        sinks: Mutex<Vec<SubscriptionSink>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn query(&self, request: GraphqlRequest) -> anyhow::Result<Value> {
            self.queries.lock().push(request);
            self.response
                .lock()
                .take()
                .unwrap_or_else(|| Ok(json!({ "getBars": null })))
        }

        fn subscribe(&self, request: GraphqlRequest, sink: SubscriptionSink) -> anyhow::Result<UpstreamHandle> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            self.subscriptions.lock().push(request);
            self.sinks.lock().push(sink);
            let released = self.released.clone();
            Ok(UpstreamHandle::new(format!("mock-{n}"), move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    struct MockLookup;

    #[async_trait]
    impl SymbolLookup for MockLookup {
        async fn lookup_address(&self, ticker: &str) -> anyhow::Result<String> {
            match ticker {
                "WIF" => Ok(WIF.to_string()),
                "BONK" => Ok(BONK.to_string()),
                "BROKEN" => Ok("broken-address".to_string()),
                _ => anyhow::bail!("unknown ticker {ticker}"),
            }
        }

        async fn lookup_instrument_metadata(&self, address: &str) -> anyhow::Result<InstrumentMetadata> {
            if address != WIF && address != BONK {
                anyhow::bail!("no metadata for {address}");
            }
            Ok(InstrumentMetadata {
                address: address.to_string(),
                decimals: 6,
                name: Some("dogwifhat".into()),
                symbol: Some("WIF".into()),
                exchanges: vec!["Raydium".into()],
            })
        }

        async fn list_pairs_for_token(&self, token_address: &str) -> anyhow::Result<Vec<TradingPair>> {
            if token_address != WIF {
                return Ok(Vec::new());
            }
            Ok(vec![
                pair("shallow", RAYDIUM_AMM_ADDRESS, 100.0),
                pair(WIF_POOL, RAYDIUM_CLMM_ADDRESS, 5_000.0),
                pair("elsewhere", "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", 90_000.0),
            ])
        }
    }

    fn pair(address: &str, exchange_hash: &str, pooled_token0: f64) -> TradingPair {
        TradingPair {
            address: address.to_string(),
            exchange_hash: exchange_hash.to_string(),
            pooled_token0,
        }
    }

    fn setup() -> (Arc<MockTransport>, Datafeed) {
        let transport = Arc::new(MockTransport::default());
        let config = Arc::new(RuntimeConfig::default());
        let mux = Multiplexer::new(transport.clone(), StreamSettings::default());
        let feed = Datafeed::new(config, transport.clone(), Arc::new(MockLookup), mux);
        (transport, feed)
    }

    #[test]
    fn symbol_name_forms() {
        let full = parse_symbol("Raydium:WIF/SOL", "USDC", "Solana").unwrap();
        assert_eq!(full.exchange, "Raydium");
        assert_eq!(full.from_symbol, "WIF");
        assert_eq!(full.to_symbol, "SOL");

        let pair = parse_symbol("WIF/USDC", "USDC", "Solana").unwrap();
        assert_eq!(pair.exchange, "Solana");

        let bare = parse_symbol("WIF", "USDC", "Solana").unwrap();
        assert_eq!(bare.to_symbol, "USDC");

        assert!(parse_symbol("", "USDC", "Solana").is_none());
        assert!(parse_symbol("WIF/", "USDC", "Solana").is_none());
        assert!(parse_symbol("a:b:c/d", "USDC", "Solana").is_none());
    }

    #[test]
    fn pair_selection_prefers_deepest_allowed_pool() {
        let allowed = vec![RAYDIUM_AMM_ADDRESS.to_string(), RAYDIUM_CLMM_ADDRESS.to_string()];
        let pairs = vec![
            pair("a", RAYDIUM_AMM_ADDRESS, 10.0),
            pair("b", "orca", 1_000_000.0),
            pair("c", RAYDIUM_CLMM_ADDRESS, 250.5),
            pair("d", RAYDIUM_AMM_ADDRESS, 250.0),
        ];
        assert_eq!(select_pair(&pairs, &allowed).map(|p| p.address.as_str()), Some("c"));
        assert!(select_pair(&pairs[1..2], &allowed).is_none());
        assert!(select_pair(&[], &allowed).is_none());
    }

    #[tokio::test]
    async fn resolve_keys_bars_by_selected_pool() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF").await.unwrap();
        assert_eq!(info.address, WIF);
        assert_eq!(info.pair_address, WIF_POOL);

        feed.subscribe_bars(&info, "1S", |_| {}, "chart-1", || {}).unwrap();
        let subscriptions = transport.subscriptions.lock();
        assert_eq!(subscriptions[0].variables["pairId"], format!("{WIF_POOL}:1399811149"));
    }

    #[tokio::test]
    async fn token_without_listed_pools_falls_back_to_token_address() {
        let (_, feed) = setup();
        let info = feed.resolve("BONK").await.unwrap();
        assert_eq!(info.pair_address, BONK);
        assert_eq!(info.channel(Resolution::M1).pair_id(), format!("{BONK}:1399811149"));
    }

    #[tokio::test]
    async fn on_ready_answers_asynchronously() {
        let (_, feed) = setup();
        let (tx, rx) = tokio::sync::oneshot::channel();
        feed.on_ready(move |cfg| {
            let _ = tx.send(cfg);
        });
        let cfg = rx.await.unwrap();
        assert!(cfg.supported_resolutions.contains(&"1S".to_string()));
        assert_eq!(cfg.exchanges[1].value, "Raydium");
        assert_eq!(cfg.symbols_types[0].value, "crypto");
        assert!(cfg.supports_time);
    }

    #[tokio::test]
    async fn resolve_builds_symbol_info() {
        let (_, feed) = setup();
        let mut resolved = None;
        feed.resolve_symbol("WIF/USDC", |info| resolved = Some(info), |_| panic!("should resolve"))
            .await;
        let info = resolved.unwrap();
        assert_eq!(info.name, "WIF/USDC");
        assert_eq!(info.full_name, "WIF/USDC");
        assert_eq!(info.pricescale, 1_000_000);
        assert_eq!(info.exchange, "Solana");
        assert_eq!(info.session, "24x7");
        assert_eq!(info.address, WIF);
        assert_eq!(serde_json::to_value(&info).unwrap()["type"], "crypto");
    }

    #[tokio::test]
    async fn resolve_failures_use_fixed_message() {
        let (_, feed) = setup();
        for name in ["DOGE/USDC", "BROKEN", ""] {
            let mut message = None;
            feed.resolve_symbol(name, |_| panic!("should fail"), |m| message = Some(m))
                .await;
            assert_eq!(message.as_deref(), Some("unable to resolve symbol"));
        }
    }

    #[tokio::test]
    async fn get_bars_transforms_history() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF/USDC").await.unwrap();
        *transport.response.lock() = Some(Ok(json!({ "getBars": {
            "t": [1000, 1060], "o": [1, 2], "h": [1.5, 2.5],
            "l": [0.9, 1.9], "c": [1.2, 2.2], "v": [10, 20]
        } })));

        let mut out = None;
        let period = PeriodParams { from: 900, to: 1200, count_back: 2, first_data_request: true };
        feed.get_bars(&info, "1", period, |bars, meta| out = Some((bars, meta)), |e| panic!("{e}"))
            .await;

        let (bars, meta) = out.unwrap();
        assert!(!meta.no_data);
        assert_eq!(
            bars,
            vec![
                Bar { time: 1_000_000, open: 1.0, high: 1.5, low: 0.9, close: 1.2, volume: 10.0 },
                Bar { time: 1_060_000, open: 2.0, high: 2.5, low: 1.9, close: 2.2, volume: 20.0 },
            ]
        );

        let queries = transport.queries.lock();
        let vars = &queries[0].variables;
        assert_eq!(vars["symbol"], format!("{WIF_POOL}:1399811149"));
        assert_eq!(vars["resolution"], "1");
        assert_eq!(vars["from"], 900);
        assert_eq!(vars["countback"], 2);
    }

    #[tokio::test]
    async fn count_back_sizes_the_default_window() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF").await.unwrap();
        let period = PeriodParams { from: 0, to: 10_000, count_back: 10, first_data_request: true };
        feed.history(&info, Resolution::M5, period).await.unwrap();

        let queries = transport.queries.lock();
        let vars = &queries[0].variables;
        assert_eq!(vars["from"], 10_000 - 10 * 300);
        assert_eq!(vars["to"], 10_000);
        assert_eq!(vars["countback"], 10);
    }

    #[tokio::test]
    async fn empty_history_is_no_data() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF").await.unwrap();
        *transport.response.lock() = Some(Ok(json!({ "getBars": { "t": [] } })));

        let (bars, meta) = feed.history(&info, Resolution::M1, PeriodParams::default()).await.unwrap();
        assert!(bars.is_empty());
        assert!(meta.no_data);

        // Defaulted window: to = now, from = to - 24h.
        let queries = transport.queries.lock();
        let vars = &queries[0].variables;
        let span = vars["to"].as_i64().unwrap() - vars["from"].as_i64().unwrap();
        assert_eq!(span, 86_400);
        assert_eq!(vars["countback"], 100);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error_not_no_data() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF").await.unwrap();
        *transport.response.lock() = Some(Err(anyhow::anyhow!("connection refused")));

        let mut message = None;
        feed.get_bars(&info, "1", PeriodParams::default(), |_, _| panic!("should fail"), |m| message = Some(m))
            .await;
        assert_eq!(message.as_deref(), Some("Failed to load bars. Error: connection refused"));

        let mut message = None;
        feed.get_bars(&info, "3", PeriodParams::default(), |_, _| panic!("should fail"), |m| message = Some(m))
            .await;
        assert!(message.unwrap().contains("unsupported resolution: 3"));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_by_uid() {
        let (transport, feed) = setup();
        let info = feed.resolve("WIF/USDC").await.unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));

        for uid in ["chart-1", "chart-2"] {
            let t = ticks.clone();
            feed.subscribe_bars(&info, "1S", move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            }, uid, || {})
                .unwrap();
        }
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);

        transport.sinks.lock()[0].data(json!({ "onUnconfirmedBarsUpdated": { "aggregates": {
            "r1S": { "token": { "t": 5, "o": 1, "h": 1, "l": 1, "c": 1, "volume": "3" } }
        } } }));
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        feed.unsubscribe_bars("chart-1");
        feed.unsubscribe_bars("chart-1");
        assert_eq!(transport.released.load(Ordering::SeqCst), 0);
        feed.unsubscribe_bars("chart-2");
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);

        assert!(matches!(
            feed.subscribe_bars(&info, "2", |_| {}, "chart-3", || {}),
            Err(FeedError::UnsupportedResolution(_))
        ));
    }
}
