// =============================================================================
// Live Event Normalizer — upstream push payloads into partial bars
// =============================================================================
//
// Codex pushes bar snapshots under one of two roots:
//
//   { "onUnconfirmedBarsUpdated": { "aggregates": { "r1S": { ... } } } }
//   { "onBarsUpdated":            { "aggregates": { "r1":  { ... } } } }
//
// and each aggregate window is either the legacy flat shape
// `{ t, o, h, l, c, v }` or a quoted pair `{ token: {...}, usd: {...} }`.
// Absence at any level is normal traffic (other windows on a shared stream,
// the other quote) and simply produces no bar.
// =============================================================================

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::trace;

use super::bar::{wire_f64, wire_millis, PartialBar};
use crate::types::{QuoteCurrency, Resolution};

// ---------------------------------------------------------------------------
// Payload model
// ---------------------------------------------------------------------------

/// One upstream push event, tagged by the subscription that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Unconfirmed(BarsUpdate),
    Confirmed(BarsUpdate),
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default, rename = "onUnconfirmedBarsUpdated")]
    unconfirmed: Option<BarsUpdate>,
    #[serde(default, rename = "onBarsUpdated")]
    confirmed: Option<BarsUpdate>,
}

/// Body shared by both event roots. Windows are kept as raw JSON and only the
/// subscribed one is decoded, so a garbled neighbour never hides ours.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BarsUpdate {
    #[serde(default, rename = "pairId")]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub aggregates: Option<Map<String, Value>>,
}

/// A single aggregate window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WindowPayload {
    Flat(WireOhlcv),
    Quoted(QuotedWindow),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuotedWindow {
    #[serde(default)]
    pub token: Option<WireOhlcv>,
    #[serde(default)]
    pub usd: Option<WireOhlcv>,
}

/// OHLCV cells exactly as sent; numbers may arrive as strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireOhlcv {
    pub t: Value,
    #[serde(default)]
    pub o: Value,
    #[serde(default)]
    pub h: Value,
    #[serde(default)]
    pub l: Value,
    #[serde(default)]
    pub c: Value,
    #[serde(default)]
    pub v: Value,
    #[serde(default)]
    pub volume: Value,
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

impl UpstreamEvent {
    /// Classify a subscription `data` object. `None` when neither known root
    /// is present.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let envelope = EventEnvelope::deserialize(payload).ok()?;
        match (envelope.unconfirmed, envelope.confirmed) {
            (Some(update), _) => Some(Self::Unconfirmed(update)),
            (None, Some(update)) => Some(Self::Confirmed(update)),
            (None, None) => None,
        }
    }

    pub fn partial_bar(&self, resolution: Resolution, quote: QuoteCurrency) -> Option<PartialBar> {
        match self {
            Self::Unconfirmed(update) => normalize_unconfirmed(update, resolution, quote),
            Self::Confirmed(update) => normalize_confirmed(update, resolution, quote),
        }
    }
}

fn normalize_unconfirmed(
    update: &BarsUpdate,
    resolution: Resolution,
    quote: QuoteCurrency,
) -> Option<PartialBar> {
    update.window(resolution)?.partial_bar(quote)
}

fn normalize_confirmed(
    update: &BarsUpdate,
    resolution: Resolution,
    quote: QuoteCurrency,
) -> Option<PartialBar> {
    // Closed bars always carry a complete OHLC set; require the open so a
    // truncated closed bar never overwrites a healthy in-progress one.
    let bar = update.window(resolution)?.partial_bar(quote)?;
    bar.open.map(|_| bar)
}

impl BarsUpdate {
    fn window(&self, resolution: Resolution) -> Option<WindowPayload> {
        let raw = self.aggregates.as_ref()?.get(resolution.aggregate_key())?;
        WindowPayload::deserialize(raw).ok()
    }
}

impl WindowPayload {
    fn partial_bar(&self, quote: QuoteCurrency) -> Option<PartialBar> {
        match self {
            Self::Flat(cells) => cells.partial_bar(),
            Self::Quoted(window) => match quote {
                QuoteCurrency::Token => window.token.as_ref()?.partial_bar(),
                QuoteCurrency::Usd => window.usd.as_ref()?.partial_bar(),
            },
        }
    }
}

impl WireOhlcv {
    fn partial_bar(&self) -> Option<PartialBar> {
        let time = wire_millis(&self.t)?;
        let volume = wire_f64(&self.volume)
            .or_else(|| wire_f64(&self.v))
            .unwrap_or(0.0);
        Some(PartialBar {
            time,
            open: wire_f64(&self.o),
            high: wire_f64(&self.h)?,
            low: wire_f64(&self.l)?,
            close: wire_f64(&self.c)?,
            volume,
        })
    }
}

/// Normalise one push payload for a channel at `resolution`, or `None` if the
/// payload carries nothing for it.
pub fn normalize(payload: &Value, resolution: Resolution, quote: QuoteCurrency) -> Option<PartialBar> {
    let bar = UpstreamEvent::from_payload(payload)?.partial_bar(resolution, quote);
    if bar.is_none() {
        trace!(resolution = %resolution, quote = %quote, "event not applicable to channel");
    }
    bar
}
