// =============================================================================
// Bar Transform — columnar history response into widget bars
// =============================================================================

use serde_json::Value;

use super::bar::{wire_f64, wire_millis, Bar};

/// Convert a columnar `getBars` response into bars, one per timestamp.
///
/// Expected shape (`v` may be spelled `volume`, or be missing entirely):
/// ```json
/// { "t": [1000, 1060], "o": [1, 2], "h": [1.5, 2.5], "l": [0.9, 1.9],
///   "c": [1.2, 2.2], "v": [10, 20] }
/// ```
///
/// Returns an empty vec when `t` is absent or not an array; callers treat
/// that as "no data". Missing price cells become 0 and missing volume
/// becomes 0. Input order is preserved.
pub fn transform_bars(data: &Value) -> Vec<Bar> {
    let Some(times) = data.get("t").and_then(Value::as_array) else {
        return Vec::new();
    };

    let volume_key = if data.get("v").map_or(false, Value::is_array) {
        "v"
    } else {
        "volume"
    };

    times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            let Some(time) = wire_millis(t) else {
                tracing::debug!(index = i, raw = %t, "skipping history row without a usable timestamp");
                return None;
            };
            Some(
                Bar {
                    time,
                    open: cell(data, "o", i),
                    high: cell(data, "h", i),
                    low: cell(data, "l", i),
                    close: cell(data, "c", i),
                    volume: cell(data, volume_key, i),
                }
                .ensure_envelope(),
            )
        })
        .collect()
}

fn cell(data: &Value, column: &str, index: usize) -> f64 {
    data.get(column)
        .and_then(Value::as_array)
        .and_then(|col| col.get(index))
        .and_then(wire_f64)
        .unwrap_or(0.0)
}
