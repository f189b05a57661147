// =============================================================================
// Bar Merge Engine — folds partial snapshots into the channel's current bar
// =============================================================================
//
// Upstream pushes are running snapshots of the open interval. An event with
// the same interval start updates the current bar in place; a later start
// rolls over to a new bar. The interval boundary comes from the event itself
// and is compared by exact equality; it is never recomputed from wall-clock
// time.
// =============================================================================

use tracing::debug;

use super::bar::{Bar, PartialBar};

/// Per-channel merge state: the most recently emitted bar.
#[derive(Debug, Clone, Default)]
pub struct BarMerger {
    last: Option<Bar>,
}

impl BarMerger {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn last(&self) -> Option<Bar> {
        self.last
    }

    /// Fold `partial` into the current bar and return the bar to emit.
    ///
    /// * no previous bar, or a later interval start: the event starts a new
    ///   bar verbatim.
    /// * same interval start: `open` kept, `high`/`low` widened, `close` and
    ///   `volume` taken from the event (volume is an upstream running total).
    /// * earlier interval start: stale, dropped, returns `None`.
    pub fn apply(&mut self, partial: PartialBar) -> Option<Bar> {
        let next = match self.last {
            Some(last) if partial.time == last.time => Bar {
                time: last.time,
                open: last.open,
                high: last.high.max(partial.high),
                low: last.low.min(partial.low),
                close: partial.close,
                volume: partial.volume,
            }
            .ensure_envelope(),
            Some(last) if partial.time < last.time => {
                debug!(
                    event_time = partial.time,
                    last_time = last.time,
                    "dropping out-of-order bar update"
                );
                return None;
            }
            _ => partial.into_bar(),
        };
        debug_assert!(next.is_well_formed());
        self.last = Some(next);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(bar: Bar) -> BarMerger {
        let mut merger = BarMerger::new();
        merger.apply(bar.into());
        merger
    }

    fn partial(time: i64, high: f64, low: f64, close: f64, volume: f64) -> PartialBar {
        PartialBar {
            time,
            open: None,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn first_event_is_emitted_verbatim() {
        let mut merger = BarMerger::new();
        let bar = merger
            .apply(PartialBar {
                time: 1000,
                open: Some(1.0),
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 3.0,
            })
            .unwrap();
        assert_eq!(
            bar,
            Bar { time: 1000, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 3.0 }
        );
        assert_eq!(merger.last(), Some(bar));
    }

    #[test]
    fn same_interval_update_merges() {
        let mut merger = seeded(Bar {
            time: 5000,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 100.0,
        });
        let merged = merger.apply(partial(5000, 13.0, 9.5, 11.5, 150.0)).unwrap();
        assert_eq!(
            merged,
            Bar { time: 5000, open: 10.0, high: 13.0, low: 9.0, close: 11.5, volume: 150.0 }
        );
        assert_eq!(merger.last(), Some(merged));
    }

    #[test]
    fn new_interval_starts_fresh_bar() {
        let mut merger = seeded(Bar {
            time: 5000,
            open: 10.0,
            high: 13.0,
            low: 9.0,
            close: 11.5,
            volume: 150.0,
        });
        let event = Bar {
            time: 6000,
            open: 11.5,
            high: 11.5,
            low: 11.5,
            close: 11.5,
            volume: 5.0,
        };
        let emitted = merger.apply(event.into()).unwrap();
        assert_eq!(emitted, event);
        assert_eq!(merger.last(), Some(event));
    }

    #[test]
    fn update_keeps_open_and_monotone_extremes() {
        let mut merger = seeded(Bar {
            time: 0,
            open: 5.0,
            high: 6.0,
            low: 4.0,
            close: 5.5,
            volume: 1.0,
        });
        let mut prev = merger.last().unwrap();
        for (high, low, close) in [(5.5, 4.5, 5.2), (7.0, 4.8, 6.9), (6.0, 3.0, 3.5)] {
            let next = merger.apply(partial(0, high, low, close, 2.0)).unwrap();
            assert_eq!(next.open, 5.0);
            assert!(next.high >= prev.high);
            assert!(next.low <= prev.low);
            assert_eq!(next.close, close);
            assert!(next.is_well_formed());
            prev = next;
        }
    }

    #[test]
    fn update_below_running_open_keeps_envelope() {
        let mut merger = seeded(Bar {
            time: 0,
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
            volume: 0.0,
        });
        // Upstream snapshot whose own range sits entirely under the open.
        let bar = merger.apply(partial(0, 8.0, 7.0, 7.5, 1.0)).unwrap();
        assert_eq!(bar.high, 10.0);
        assert_eq!(bar.low, 7.0);
        assert!(bar.is_well_formed());
    }

    #[test]
    fn stale_interval_is_dropped() {
        let mut merger = seeded(Bar {
            time: 6000,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        });
        assert!(merger.apply(partial(5000, 9.0, 0.1, 5.0, 1.0)).is_none());
        assert_eq!(merger.last().unwrap().time, 6000);
    }

    #[test]
    fn rollover_uses_exact_equality() {
        let mut merger = seeded(Bar {
            time: 60_000,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        });
        // One millisecond later is a different interval start, not an update.
        let bar = merger.apply(partial(60_001, 2.0, 2.0, 2.0, 1.0)).unwrap();
        assert_eq!(bar.time, 60_001);
        assert_eq!(bar.open, 2.0);
    }
}
