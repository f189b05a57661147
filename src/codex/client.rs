// =============================================================================
// Codex GraphQL HTTP Client — queries and symbol lookup
// =============================================================================
//
// SECURITY: The API key is sent as the `Authorization` header and is never
// logged.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::queries::{list_pairs_request, search_token_request, token_metadata_request};
use crate::market_data::bar::wire_f64;
use crate::transport::{GraphqlRequest, InstrumentMetadata, SymbolLookup, TradingPair};

/// Thin GraphQL-over-HTTP client for the Codex API.
#[derive(Clone)]
pub struct CodexClient {
    url: String,
    network_id: u64,
    client: reqwest::Client,
    /// Ticker → address overrides consulted before searching.
    known_addresses: HashMap<String, String>,
}

impl CodexClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(
        url: impl Into<String>,
        api_key: &str,
        network_id: u64,
        known_addresses: HashMap<String, String>,
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !api_key.is_empty() {
            let val = HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
            default_headers.insert(AUTHORIZATION, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let url = url.into();
        debug!(url = %url, network_id, "CodexClient initialised");

        Ok(Self {
            url,
            network_id,
            client,
            known_addresses: known_addresses
                .into_iter()
                .map(|(ticker, addr)| (ticker.to_uppercase(), addr))
                .collect(),
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// POST a GraphQL request and return its `data` object.
    #[instrument(skip(self, request), name = "codex::query")]
    pub async fn query(&self, request: &GraphqlRequest) -> Result<Value> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .context("Codex GraphQL request failed")?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("failed to parse Codex GraphQL response")?;

        if !status.is_success() {
            anyhow::bail!("Codex GraphQL returned {}: {}", status, body);
        }

        graphql_data(body)
    }
}

/// Split a GraphQL response into its `data`, failing on a non-empty `errors`.
fn graphql_data(mut body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            anyhow::bail!("Codex GraphQL errors: {}", messages.join("; "));
        }
    }
    Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

// -------------------------------------------------------------------------
// Symbol lookup
// -------------------------------------------------------------------------

#[async_trait]
impl SymbolLookup for CodexClient {
    #[instrument(skip(self), name = "codex::lookup_address")]
    async fn lookup_address(&self, ticker: &str) -> Result<String> {
        if let Some(addr) = self.known_addresses.get(&ticker.to_uppercase()) {
            return Ok(addr.clone());
        }

        let data = self.query(&search_token_request(ticker, self.network_id)).await?;
        let address = pick_search_result(&data, ticker)
            .with_context(|| format!("no token found for ticker {ticker}"))?;
        debug!(ticker, address = %address, "ticker resolved");
        Ok(address)
    }

    #[instrument(skip(self), name = "codex::lookup_instrument_metadata")]
    async fn lookup_instrument_metadata(&self, address: &str) -> Result<InstrumentMetadata> {
        let data = self
            .query(&token_metadata_request(address, self.network_id))
            .await?;
        parse_token_metadata(&data, address)
    }

    #[instrument(skip(self), name = "codex::list_pairs_for_token")]
    async fn list_pairs_for_token(&self, token_address: &str) -> Result<Vec<TradingPair>> {
        let data = self
            .query(&list_pairs_request(token_address, self.network_id))
            .await?;
        let pairs = parse_pairs(&data);
        debug!(token = %token_address, pairs = pairs.len(), "pairs listed");
        Ok(pairs)
    }
}

/// Prefer an exact (case-insensitive) symbol match, else the first result.
fn pick_search_result(data: &Value, ticker: &str) -> Option<String> {
    let results = data["filterTokens"]["results"].as_array()?;
    let address_of = |r: &Value| r["token"]["address"].as_str().map(str::to_string);
    results
        .iter()
        .find(|r| {
            r["token"]["symbol"]
                .as_str()
                .map_or(false, |s| s.eq_ignore_ascii_case(ticker))
        })
        .and_then(address_of)
        .or_else(|| results.first().and_then(address_of))
}

fn parse_token_metadata(data: &Value, address: &str) -> Result<InstrumentMetadata> {
    let token = data["tokens"]
        .as_array()
        .and_then(|tokens| tokens.iter().find(|t| !t.is_null()))
        .with_context(|| format!("token {address} not found"))?;

    let decimals = token["decimals"]
        .as_u64()
        .with_context(|| format!("token {address} has no decimals"))?;
    if decimals > 18 {
        warn!(address, decimals, "unusually large token decimals");
    }

    let exchanges = token["exchanges"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|e| e["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(InstrumentMetadata {
        address: token["address"].as_str().unwrap_or(address).to_string(),
        decimals: u32::try_from(decimals)
            .with_context(|| format!("token {address} decimals {decimals} out of range"))?,
        name: token["name"].as_str().map(str::to_string),
        symbol: token["symbol"].as_str().map(str::to_string),
        exchanges,
    })
}

/// Pools from a `listPairsForToken` response. Entries without an address are
/// skipped; a missing or unparseable `pooled.token0` counts as empty.
fn parse_pairs(data: &Value) -> Vec<TradingPair> {
    let Some(list) = data["listPairsForToken"].as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|pair| {
            let address = pair["address"]
                .as_str()
                .or_else(|| pair["id"].as_str().and_then(|id| id.split(':').next()))
                .filter(|a| !a.is_empty())?;
            Some(TradingPair {
                address: address.to_string(),
                exchange_hash: pair["exchangeHash"].as_str().unwrap_or_default().to_string(),
                pooled_token0: wire_f64(&pair["pooled"]["token0"]).unwrap_or(0.0),
            })
        })
        .collect()
}
