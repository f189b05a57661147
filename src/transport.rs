// =============================================================================
// Collaborator seams — GraphQL transport and symbol lookup
// =============================================================================
//
// The streaming core only ever talks to these traits. The Codex-backed
// implementations live in `crate::codex`; tests plug in mocks.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A GraphQL document plus its variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>, variables: Value) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription plumbing
// ---------------------------------------------------------------------------

type DataFn = dyn Fn(Value) + Send + Sync;
type ErrorFn = dyn Fn(anyhow::Error) + Send + Sync;
type CompleteFn = dyn Fn() + Send + Sync;

/// Callbacks a transport invokes for one long-lived subscription.
#[derive(Clone)]
pub struct SubscriptionSink {
    on_data: Arc<DataFn>,
    on_error: Arc<ErrorFn>,
    on_complete: Arc<CompleteFn>,
}

impl SubscriptionSink {
    pub fn new(
        on_data: impl Fn(Value) + Send + Sync + 'static,
        on_error: impl Fn(anyhow::Error) + Send + Sync + 'static,
        on_complete: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_data: Arc::new(on_data),
            on_error: Arc::new(on_error),
            on_complete: Arc::new(on_complete),
        }
    }

    pub fn data(&self, payload: Value) {
        (self.on_data)(payload)
    }

    pub fn error(&self, err: anyhow::Error) {
        (self.on_error)(err)
    }

    pub fn complete(&self) {
        (self.on_complete)()
    }
}

impl std::fmt::Debug for SubscriptionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSink").finish_non_exhaustive()
    }
}

/// Ownership token for one live upstream subscription.
///
/// The release closure runs exactly once: on [`UpstreamHandle::release`] or,
/// failing that, when the handle is dropped.
pub struct UpstreamHandle {
    id: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl UpstreamHandle {
    pub fn new(id: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: id.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("id", &self.id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Point-in-time queries and push subscriptions over one provider connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a query and return its `data` object.
    async fn query(&self, request: GraphqlRequest) -> Result<Value>;

    /// Open a push subscription. Failure to open is reported here; failures
    /// after that arrive through `sink`.
    fn subscribe(&self, request: GraphqlRequest, sink: SubscriptionSink) -> Result<UpstreamHandle>;
}

/// Token metadata needed to describe an instrument to the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMetadata {
    pub address: String,
    pub decimals: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub exchanges: Vec<String>,
}

/// One pool trading a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    /// Pool address; `address:network_id` is the pair id bars are keyed by.
    pub address: String,
    /// Program hash of the exchange the pool lives on.
    pub exchange_hash: String,
    /// Liquidity on the pool's token0 side.
    pub pooled_token0: f64,
}

/// Ticker → address → metadata resolution, and the pools a token trades in.
#[async_trait]
pub trait SymbolLookup: Send + Sync {
    async fn lookup_address(&self, ticker: &str) -> Result<String>;

    async fn lookup_instrument_metadata(&self, address: &str) -> Result<InstrumentMetadata>;

    async fn list_pairs_for_token(&self, token_address: &str) -> Result<Vec<TradingPair>>;
}
