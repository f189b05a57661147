pub mod client;
pub mod queries;
pub mod ws;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::transport::{GraphqlRequest, SubscriptionSink, Transport, UpstreamHandle};

pub use client::CodexClient;
pub use ws::GraphqlWsClient;

/// Codex-backed [`Transport`]: queries over HTTP, subscriptions over the
/// shared `graphql-transport-ws` connection.
#[derive(Clone)]
pub struct CodexTransport {
    http: CodexClient,
    ws: GraphqlWsClient,
}

impl CodexTransport {
    pub fn new(http: CodexClient, ws: GraphqlWsClient) -> Self {
        Self { http, ws }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.ws.active_count()
    }
}

#[async_trait]
impl Transport for CodexTransport {
    async fn query(&self, request: GraphqlRequest) -> Result<Value> {
        self.http.query(&request).await
    }

    fn subscribe(&self, request: GraphqlRequest, sink: SubscriptionSink) -> Result<UpstreamHandle> {
        self.ws.subscribe(request, sink)
    }
}
