// =============================================================================
// Codex GraphQL documents and variable builders
// =============================================================================

use serde_json::{json, Value};

use crate::market_data::ChannelKey;
use crate::transport::GraphqlRequest;
use crate::types::{QuoteCurrency, QuoteToken, Resolution, StreamKind};

pub const GET_BARS: &str = r#"query GetBars($symbol: String!, $from: Int!, $to: Int!, $resolution: String!, $countback: Int, $removeEmptyBars: Boolean, $removeLeadingNullValues: Boolean, $quoteToken: QuoteToken, $currencyCode: String) {
  getBars(symbol: $symbol, from: $from, to: $to, resolution: $resolution, countback: $countback, removeEmptyBars: $removeEmptyBars, removeLeadingNullValues: $removeLeadingNullValues, quoteToken: $quoteToken, currencyCode: $currencyCode) {
    t
    o
    h
    l
    c
    v
    volume
  }
}"#;

pub const TOKEN_METADATA: &str = r#"query Tokens($ids: [TokenInput]) {
  tokens(ids: $ids) {
    address
    decimals
    name
    symbol
    networkId
    exchanges {
      name
    }
  }
}"#;

pub const SEARCH_TOKEN: &str = r#"query SearchToken($phrase: String, $networkId: Int) {
  filterTokens(phrase: $phrase, filters: { network: [$networkId] }, limit: 5) {
    results {
      token {
        address
        symbol
      }
    }
  }
}"#;

pub const LIST_PAIRS_FOR_TOKEN: &str = r#"query ListPairsForToken($networkId: Int!, $tokenAddress: String!, $limit: Int) {
  listPairsForToken(networkId: $networkId, tokenAddress: $tokenAddress, limit: $limit) {
    id
    address
    exchangeHash
    pooled {
      token0
      token1
    }
  }
}"#;

/// Parameters for one historical bars query.
#[derive(Debug, Clone, PartialEq)]
pub struct BarsQuery {
    pub pair_id: String,
    pub resolution: Resolution,
    pub from: i64,
    pub to: i64,
    pub countback: u32,
    pub quote_token: QuoteToken,
    pub quote_currency: QuoteCurrency,
}

impl BarsQuery {
    pub fn request(&self) -> GraphqlRequest {
        GraphqlRequest::new(
            GET_BARS,
            json!({
                "symbol": self.pair_id,
                "from": self.from,
                "to": self.to,
                "resolution": self.resolution.codex_str(),
                "countback": self.countback,
                "removeEmptyBars": true,
                "removeLeadingNullValues": true,
                "quoteToken": self.quote_token.to_string(),
                "currencyCode": currency_code(self.quote_currency),
            }),
        )
    }
}

fn currency_code(quote: QuoteCurrency) -> &'static str {
    match quote {
        QuoteCurrency::Token => "TOKEN",
        QuoteCurrency::Usd => "USD",
    }
}

pub fn token_metadata_request(address: &str, network_id: u64) -> GraphqlRequest {
    GraphqlRequest::new(
        TOKEN_METADATA,
        json!({ "ids": [{ "address": address, "networkId": network_id }] }),
    )
}

pub fn search_token_request(ticker: &str, network_id: u64) -> GraphqlRequest {
    GraphqlRequest::new(
        SEARCH_TOKEN,
        json!({ "phrase": ticker, "networkId": network_id }),
    )
}

pub fn list_pairs_request(token_address: &str, network_id: u64) -> GraphqlRequest {
    GraphqlRequest::new(
        LIST_PAIRS_FOR_TOKEN,
        json!({ "networkId": network_id, "tokenAddress": token_address, "limit": 10 }),
    )
}

/// Push subscription for one channel. Only the channel's own aggregate window
/// is requested.
pub fn bars_subscription_request(
    key: &ChannelKey,
    kind: StreamKind,
    quote_token: QuoteToken,
) -> GraphqlRequest {
    let (operation, field) = match kind {
        StreamKind::Unconfirmed => ("OnUnconfirmedBarsUpdated", "onUnconfirmedBarsUpdated"),
        StreamKind::Confirmed => ("OnBarsUpdated", "onBarsUpdated"),
    };
    let window = key.resolution.aggregate_key();
    let query = format!(
        "subscription {operation}($pairId: String, $quoteToken: QuoteToken) {{
  {field}(pairId: $pairId, quoteToken: $quoteToken) {{
    pairId
    aggregates {{
      {window} {{
        token {{ t o h l c volume }}
        usd {{ t o h l c volume }}
      }}
    }}
  }}
}}"
    );
    GraphqlRequest::new(
        query,
        json!({ "pairId": key.pair_id(), "quoteToken": quote_token.to_string() }),
    )
}

/// Pull `getBars` out of a query's `data` object (null when absent).
pub fn bars_payload(data: &Value) -> &Value {
    &data["getBars"]
}
