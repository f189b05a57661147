use serde::{Deserialize, Serialize};

use crate::types::Resolution;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar in the shape the charting widget consumes.
///
/// `time` is the interval start in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Widen `high`/`low` so they bracket `open` and `close`, and clamp a
    /// negative or non-finite volume to zero.
    ///
    /// Upstream snapshots occasionally report a high below the running open;
    /// every bar handed to a consumer goes through here first.
    pub fn ensure_envelope(mut self) -> Self {
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        if !(self.high >= body_high) {
            self.high = body_high;
        }
        if !(self.low <= body_low) {
            self.low = body_low;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            self.volume = 0.0;
        }
        self
    }

    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.open.min(self.close) <= self.open.max(self.close)
            && self.open.max(self.close) <= self.high
            && self.volume >= 0.0
    }
}

/// Running snapshot of one interval as reported by a single upstream event.
///
/// Some payload variants omit the open; the merge engine falls back to the
/// running open (or to `close` for a fresh interval).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialBar {
    pub time: i64,
    pub open: Option<f64>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PartialBar {
    /// Materialise as a standalone bar (start of a new interval).
    pub fn into_bar(self) -> Bar {
        Bar {
            time: self.time,
            open: self.open.unwrap_or(self.close),
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
        .ensure_envelope()
    }
}

impl From<Bar> for PartialBar {
    fn from(bar: Bar) -> Self {
        Self {
            time: bar.time,
            open: Some(bar.open),
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

/// One market at one resolution. `address` is the pool the symbol resolved
/// to, or the token itself when it has no listed pool. Two chart
/// subscriptions with equal keys share one upstream subscription.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelKey {
    pub address: String,
    pub network_id: u64,
    pub resolution: Resolution,
}

impl ChannelKey {
    pub fn new(address: impl Into<String>, network_id: u64, resolution: Resolution) -> Self {
        Self {
            address: address.into(),
            network_id,
            resolution,
        }
    }

    /// Codex pair identifier (`address:networkId`).
    pub fn pair_id(&self) -> String {
        format!("{}:{}", self.address, self.network_id)
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.address, self.network_id, self.resolution)
    }
}

// ---------------------------------------------------------------------------
// Wire number helpers
// ---------------------------------------------------------------------------

/// Codex sends prices as JSON numbers in some responses and as decimal strings
/// in others. Anything else (null, bool, garbage text) is treated as absent.
pub fn wire_f64(val: &serde_json::Value) -> Option<f64> {
    let parsed = match val {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Same as [`wire_f64`] for integer timestamps (seconds). A float is accepted
/// only when it is integral and fits in an `i64`.
pub fn wire_i64(val: &serde_json::Value) -> Option<i64> {
    match val {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// A wire timestamp in seconds converted to bar time (milliseconds). `None`
/// when the value is unusable or the conversion would overflow.
pub fn wire_millis(val: &serde_json::Value) -> Option<i64> {
    wire_i64(val)?.checked_mul(1000)
}
