// =============================================================================
// Update Dispatcher — fan a merged bar out to every consumer of a channel
// =============================================================================

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, trace};

use crate::market_data::{Bar, ChannelKey};

/// Widget-side realtime callback (`onTick`).
pub type BarCallback = Arc<dyn Fn(Bar) + Send + Sync>;

/// Widget-side `onResetCacheNeeded`: the chart should drop its cached bars
/// and request history again.
pub type ResetCallback = Arc<dyn Fn() + Send + Sync>;

/// One chart-side subscriber registered on a channel.
///
/// Clones share the `active` flag, so a dispatch working from a snapshot sees
/// an unsubscribe that happened after the snapshot was taken.
#[derive(Clone)]
pub struct Consumer {
    id: String,
    callback: BarCallback,
    on_reset: Option<ResetCallback>,
    active: Arc<AtomicBool>,
}

impl Consumer {
    pub fn new(id: impl Into<String>, callback: BarCallback) -> Self {
        Self {
            id: id.into(),
            callback,
            on_reset: None,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_reset(mut self, on_reset: Option<ResetCallback>) -> Self {
        self.on_reset = on_reset;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Deliver `bar` to each still-active consumer in `consumers`.
///
/// A panic inside one callback is caught and logged; the remaining consumers
/// still receive the bar. Returns the number of successful deliveries.
pub fn dispatch(channel: &ChannelKey, consumers: &[Consumer], bar: &Bar) -> usize {
    let mut delivered = 0;
    for consumer in consumers {
        if !consumer.is_active() {
            trace!(channel = %channel, consumer = %consumer.id(), "skipping consumer removed mid-dispatch");
            continue;
        }
        let callback = &consumer.callback;
        match catch_unwind(AssertUnwindSafe(|| callback(*bar))) {
            Ok(()) => delivered += 1,
            Err(panic) => {
                error!(
                    channel = %channel,
                    consumer = %consumer.id(),
                    reason = %panic_message(panic.as_ref()),
                    "consumer callback failed during dispatch"
                );
            }
        }
    }
    trace!(channel = %channel, time = bar.time, delivered, "bar dispatched");
    delivered
}

/// Ask every still-active consumer that registered a reset hook to drop its
/// cached history. Panics are contained the same way as in [`dispatch`].
pub fn request_reset(channel: &ChannelKey, consumers: &[Consumer]) -> usize {
    let mut notified = 0;
    for consumer in consumers.iter().filter(|c| c.is_active()) {
        let Some(on_reset) = &consumer.on_reset else {
            continue;
        };
        match catch_unwind(AssertUnwindSafe(|| on_reset())) {
            Ok(()) => notified += 1,
            Err(panic) => {
                error!(
                    channel = %channel,
                    consumer = %consumer.id(),
                    reason = %panic_message(panic.as_ref()),
                    "consumer reset callback failed"
                );
            }
        }
    }
    notified
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
