use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors surfaced to the widget (through its error callbacks) and to HTTP
/// clients. Internal plumbing uses `anyhow` and is mapped here at the edge.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedError {
    /// Symbol lookup failed; the widget only ever sees the fixed message.
    Resolve,
    /// Query, network or subscription-open failure.
    Transport(String),
    UnsupportedResolution(String),
    BadRequest(String),
    /// `getBars` failed; carries the message handed to the widget's error
    /// callback.
    History(String),
}

impl FeedError {
    pub fn transport(err: &anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve => write!(f, "unable to resolve symbol"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::UnsupportedResolution(res) => write!(f, "unsupported resolution: {res}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::History(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for FeedError {}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Resolve => StatusCode::NOT_FOUND,
            Self::Transport(_) | Self::History(_) => StatusCode::BAD_GATEWAY,
            Self::UnsupportedResolution(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = json!({ "s": "error", "errmsg": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
