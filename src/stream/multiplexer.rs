// =============================================================================
// Subscription Multiplexer — one upstream subscription per channel
// =============================================================================
//
// Every chart series (consumer) subscribes to a channel: one instrument at one
// resolution. The first consumer of a channel opens the upstream push
// subscription; later consumers share it. When the last consumer leaves, the
// record is dropped, which releases the upstream handle exactly once.
//
// Locking:
//   - One parking_lot::Mutex guards the channel registry.
//   - The transport is called with the registry held so two concurrent
//     first-subscribes can never open two upstream subscriptions. Transports
//     therefore must not call back into the sink synchronously from
//     `subscribe`.
//   - Consumer callbacks and upstream releases always run with the lock
//     released.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::dispatcher::{dispatch, request_reset, BarCallback, Consumer, ResetCallback};
use crate::codex::queries::bars_subscription_request;
use crate::error::FeedError;
use crate::market_data::{normalize, BarMerger, ChannelKey};
use crate::transport::{SubscriptionSink, Transport, UpstreamHandle};
use crate::types::{QuoteCurrency, QuoteToken, StreamKind};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// How upstream subscriptions are opened and interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamSettings {
    pub stream_kind: StreamKind,
    pub quote_token: QuoteToken,
    pub quote_currency: QuoteCurrency,
    /// Collapse bursts of events into one dispatch per window. `None`
    /// dispatches every event immediately.
    pub coalesce_window: Option<Duration>,
}

/// Health view of one open channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub consumers: usize,
    pub last_bar_time: Option<i64>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct SubscriptionRecord {
    generation: u64,
    merger: BarMerger,
    consumers: HashMap<String, Consumer>,
    flush_scheduled: bool,
    upstream: UpstreamHandle,
}

impl SubscriptionRecord {
    fn snapshot(&self) -> Vec<Consumer> {
        self.consumers.values().cloned().collect()
    }
}

#[derive(Default)]
struct Registry {
    records: HashMap<ChannelKey, SubscriptionRecord>,
    consumer_channels: HashMap<String, ChannelKey>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: StreamSettings,
    registry: Mutex<Registry>,
    next_generation: AtomicU64,
}

/// Shared-upstream subscription registry. Cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn Transport>, settings: StreamSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                registry: Mutex::new(Registry::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Public operations
    // -------------------------------------------------------------------------

    /// Register `callback` under `consumer_id` on `key`, opening the upstream
    /// subscription if this is the channel's first consumer. `on_reset` fires
    /// when the channel's upstream subscription errors or completes.
    ///
    /// Re-registering an id replaces its callback. If the id was registered on
    /// a different channel it is moved. When the upstream cannot be opened no
    /// record and no consumer are left behind.
    pub fn subscribe_with_reset(
        &self,
        key: &ChannelKey,
        consumer_id: &str,
        callback: BarCallback,
        on_reset: Option<ResetCallback>,
    ) -> Result<(), FeedError> {
        let previous = self.inner.registry.lock().consumer_channels.get(consumer_id).cloned();
        if let Some(previous) = previous.filter(|prev| prev != key) {
            debug!(consumer = %consumer_id, from = %previous, to = %key, "moving consumer between channels");
            self.unsubscribe(&previous, consumer_id);
        }

        let consumer = Consumer::new(consumer_id, callback).with_reset(on_reset);
        let mut registry = self.inner.registry.lock();
        let Registry {
            records,
            consumer_channels,
        } = &mut *registry;

        if let Some(record) = records.get_mut(key) {
            if let Some(replaced) = record.consumers.insert(consumer_id.to_string(), consumer) {
                replaced.deactivate();
                debug!(channel = %key, consumer = %consumer_id, "consumer callback replaced");
            } else {
                debug!(
                    channel = %key,
                    consumer = %consumer_id,
                    consumers = record.consumers.len(),
                    "consumer joined shared channel"
                );
            }
            consumer_channels.insert(consumer_id.to_string(), key.clone());
            return Ok(());
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let request = bars_subscription_request(
            key,
            self.inner.settings.stream_kind,
            self.inner.settings.quote_token,
        );
        let sink = channel_sink(Arc::downgrade(&self.inner), key.clone(), generation);

        let upstream = match self.inner.transport.subscribe(request, sink) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(channel = %key, consumer = %consumer_id, error = %e, "failed to open upstream subscription");
                return Err(FeedError::transport(&e));
            }
        };

        info!(
            channel = %key,
            consumer = %consumer_id,
            upstream = %upstream.id(),
            generation,
            "upstream subscription opened"
        );

        let mut consumers = HashMap::new();
        consumers.insert(consumer_id.to_string(), consumer);
        records.insert(
            key.clone(),
            SubscriptionRecord {
                generation,
                merger: BarMerger::new(),
                consumers,
                flush_scheduled: false,
                upstream,
            },
        );
        consumer_channels.insert(consumer_id.to_string(), key.clone());
        Ok(())
    }

    /// Remove `consumer_id` from `key`. Closing the channel's last consumer
    /// releases the upstream subscription and forgets the channel's last bar.
    /// Unknown ids are a no-op.
    pub fn unsubscribe(&self, key: &ChannelKey, consumer_id: &str) {
        let closed = {
            let mut registry = self.inner.registry.lock();
            let Registry {
                records,
                consumer_channels,
            } = &mut *registry;

            let Some(record) = records.get_mut(key) else {
                debug!(channel = %key, consumer = %consumer_id, "unsubscribe for unknown channel ignored");
                return;
            };
            let Some(consumer) = record.consumers.remove(consumer_id) else {
                debug!(channel = %key, consumer = %consumer_id, "unsubscribe for unknown consumer ignored");
                return;
            };
            consumer.deactivate();
            if consumer_channels.get(consumer_id) == Some(key) {
                consumer_channels.remove(consumer_id);
            }

            if record.consumers.is_empty() {
                records.remove(key)
            } else {
                debug!(channel = %key, consumer = %consumer_id, remaining = record.consumers.len(), "consumer left channel");
                None
            }
        };

        // Released outside the registry lock.
        if let Some(record) = closed {
            info!(channel = %key, generation = record.generation, "last consumer left, closing upstream subscription");
            record.upstream.release();
        }
    }

    /// Remove a consumer knowing only its id (the widget's `unsubscribeBars`).
    pub fn unsubscribe_consumer(&self, consumer_id: &str) {
        let key = self.inner.registry.lock().consumer_channels.get(consumer_id).cloned();
        match key {
            Some(key) => self.unsubscribe(&key, consumer_id),
            None => debug!(consumer = %consumer_id, "unsubscribe for unknown consumer ignored"),
        }
    }

    /// Drop every channel, releasing all upstream subscriptions.
    pub fn close_all(&self) {
        let records: Vec<(ChannelKey, SubscriptionRecord)> = {
            let mut registry = self.inner.registry.lock();
            registry.consumer_channels.clear();
            registry.records.drain().collect()
        };
        for (key, record) in records {
            for consumer in record.consumers.values() {
                consumer.deactivate();
            }
            info!(channel = %key, "closing upstream subscription");
            record.upstream.release();
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn channel_count(&self) -> usize {
        self.inner.registry.lock().records.len()
    }

    /// One line per open channel, sorted by channel name.
    pub fn channel_summaries(&self) -> Vec<ChannelSummary> {
        let mut summaries: Vec<ChannelSummary> = self
            .inner
            .registry
            .lock()
            .records
            .iter()
            .map(|(key, record)| ChannelSummary {
                channel: key.to_string(),
                consumers: record.consumers.len(),
                last_bar_time: record.merger.last().map(|bar| bar.time),
            })
            .collect();
        summaries.sort_by(|a, b| a.channel.cmp(&b.channel));
        summaries
    }
}

#[cfg(test)]
impl Multiplexer {
    fn subscribe(&self, key: &ChannelKey, consumer_id: &str, callback: BarCallback) -> Result<(), FeedError> {
        self.subscribe_with_reset(key, consumer_id, callback, None)
    }

    fn consumer_count(&self, key: &ChannelKey) -> usize {
        self.inner
            .registry
            .lock()
            .records
            .get(key)
            .map_or(0, |r| r.consumers.len())
    }

    fn last_bar(&self, key: &ChannelKey) -> Option<crate::market_data::Bar> {
        self.inner.registry.lock().records.get(key).and_then(|r| r.merger.last())
    }
}

// ---------------------------------------------------------------------------
// Upstream event path
// ---------------------------------------------------------------------------

fn channel_sink(inner: Weak<Inner>, key: ChannelKey, generation: u64) -> SubscriptionSink {
    let data_inner = inner.clone();
    let data_key = key.clone();
    let error_inner = inner.clone();
    let error_key = key.clone();
    SubscriptionSink::new(
        move |payload| {
            if let Some(inner) = data_inner.upgrade() {
                on_event(&inner, &data_key, generation, &payload);
            }
        },
        move |err| {
            warn!(channel = %error_key, generation, error = %err, "upstream subscription error");
            if let Some(inner) = error_inner.upgrade() {
                on_interrupted(&inner, &error_key, generation);
            }
        },
        move || {
            info!(channel = %key, generation, "upstream subscription completed");
            if let Some(inner) = inner.upgrade() {
                on_interrupted(&inner, &key, generation);
            }
        },
    )
}

/// The upstream stopped delivering. The record stays until its consumers
/// leave; consumers with a reset hook are told to refetch.
fn on_interrupted(inner: &Arc<Inner>, key: &ChannelKey, generation: u64) {
    let consumers = {
        let registry = inner.registry.lock();
        match registry.records.get(key) {
            Some(record) if record.generation == generation => record.snapshot(),
            _ => return,
        }
    };
    let notified = request_reset(key, &consumers);
    debug!(channel = %key, notified, "reset requested after upstream interruption");
}

fn on_event(inner: &Arc<Inner>, key: &ChannelKey, generation: u64, payload: &Value) {
    let Some(partial) = normalize(payload, key.resolution, inner.settings.quote_currency) else {
        return;
    };

    let (bar, consumers) = {
        let mut registry = inner.registry.lock();
        let Some(record) = registry.records.get_mut(key) else {
            return;
        };
        if record.generation != generation {
            debug!(channel = %key, generation, current = record.generation, "event from a closed subscription ignored");
            return;
        }
        let previous = record.merger.last();
        let Some(bar) = record.merger.apply(partial) else {
            return;
        };
        debug!(channel = %key, time = bar.time, close = bar.close, "bar update");

        match inner.settings.coalesce_window {
            None => (bar, record.snapshot()),
            // The pending flush will carry `bar`. If this event opened a new
            // interval, the closed one goes out now with its final values.
            Some(_) if record.flush_scheduled => match previous {
                Some(closed) if closed.time != bar.time => (closed, record.snapshot()),
                _ => return,
            },
            Some(window) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    record.flush_scheduled = true;
                    runtime.spawn(flush_after(
                        Arc::downgrade(inner),
                        key.clone(),
                        generation,
                        window,
                    ));
                    return;
                }
                // No runtime to park a timer on.
                Err(_) => (bar, record.snapshot()),
            },
        }
    };

    dispatch(key, &consumers, &bar);
}

async fn flush_after(inner: Weak<Inner>, key: ChannelKey, generation: u64, window: Duration) {
    tokio::time::sleep(window).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let (bar, consumers) = {
        let mut registry = inner.registry.lock();
        let Some(record) = registry.records.get_mut(&key) else {
            return;
        };
        if record.generation != generation {
            return;
        }
        record.flush_scheduled = false;
        let Some(bar) = record.merger.last() else {
            return;
        };
        (bar, record.snapshot())
    };
    dispatch(&key, &consumers, &bar);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Bar;
    use crate::transport::GraphqlRequest;
    use crate::types::Resolution;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MockTransport {
        opened: AtomicUsize,
        released: Arc<AtomicUsize>,
        fail_next: parking_lot::Mutex<bool>,
        sinks: parking_lot::Mutex<Vec<SubscriptionSink>>,
        requests: parking_lot::Mutex<Vec<GraphqlRequest>>,
    }

    impl MockTransport {
        fn sink(&self, index: usize) -> SubscriptionSink {
            self.sinks.lock()[index].clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn query(&self, _request: GraphqlRequest) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }

        fn subscribe(
            &self,
            request: GraphqlRequest,
            sink: SubscriptionSink,
        ) -> anyhow::Result<UpstreamHandle> {
            if std::mem::take(&mut *self.fail_next.lock()) {
                anyhow::bail!("socket closed");
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().push(sink);
            self.requests.lock().push(request);
            let released = self.released.clone();
            Ok(UpstreamHandle::new(format!("mock-{n}"), move || {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }

    fn setup(settings: StreamSettings) -> (Arc<MockTransport>, Multiplexer) {
        let transport = Arc::new(MockTransport::default());
        let mux = Multiplexer::new(transport.clone(), settings);
        (transport, mux)
    }

    fn key() -> ChannelKey {
        ChannelKey::new("EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm", 1399811149, Resolution::S1)
    }

    fn recorder() -> (BarCallback, Arc<parking_lot::Mutex<Vec<Bar>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: BarCallback = Arc::new(move |b| sink.lock().push(b));
        (cb, seen)
    }

    fn event(t: i64, o: Option<f64>, h: f64, l: f64, c: f64, v: f64) -> Value {
        let mut window = json!({ "t": t, "h": h, "l": l, "c": c, "volume": v.to_string() });
        if let Some(o) = o {
            window["o"] = json!(o);
        }
        json!({ "onUnconfirmedBarsUpdated": { "aggregates": { "r1S": { "token": window } } } })
    }

    #[test]
    fn shared_channel_opens_one_upstream() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb_a, seen_a) = recorder();
        let (cb_b, seen_b) = recorder();

        mux.subscribe(&key(), "uid-a", cb_a).unwrap();
        mux.subscribe(&key(), "uid-b", cb_b).unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(mux.consumer_count(&key()), 2);

        transport.sink(0).data(event(5, Some(10.0), 12.0, 9.0, 11.0, 100.0));
        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 1);

        mux.unsubscribe(&key(), "uid-a");
        assert_eq!(transport.released.load(Ordering::SeqCst), 0);

        transport.sink(0).data(event(5, None, 13.0, 9.5, 11.5, 150.0));
        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 2);
    }

    #[test]
    fn last_unsubscribe_releases_exactly_once() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();

        mux.subscribe(&key(), "uid-a", cb.clone()).unwrap();
        mux.unsubscribe(&key(), "uid-a");
        mux.unsubscribe(&key(), "uid-a");
        mux.unsubscribe_consumer("uid-a");
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
        assert_eq!(mux.channel_count(), 0);

        mux.subscribe(&key(), "uid-a", cb).unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(mux.channel_count(), 1);
    }

    #[test]
    fn open_failure_leaves_nothing_behind() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();
        *transport.fail_next.lock() = true;

        let err = mux.subscribe(&key(), "uid-a", cb.clone()).unwrap_err();
        assert!(matches!(err, FeedError::Transport(_)));
        assert_eq!(mux.channel_count(), 0);
        assert_eq!(mux.consumer_count(&key()), 0);

        // Nothing was registered, so a retry starts from scratch.
        mux.subscribe(&key(), "uid-a", cb).unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(mux.consumer_count(&key()), 1);
    }

    #[test]
    fn merge_scenario_through_the_channel() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, seen) = recorder();
        mux.subscribe(&key(), "uid-a", cb).unwrap();
        let sink = transport.sink(0);

        sink.data(event(5, Some(10.0), 12.0, 9.0, 11.0, 100.0));
        sink.data(event(5, None, 13.0, 9.5, 11.5, 150.0));
        sink.data(event(6, Some(11.5), 11.5, 11.5, 11.5, 5.0));

        let seen = seen.lock();
        assert_eq!(
            seen[1],
            Bar { time: 5000, open: 10.0, high: 13.0, low: 9.0, close: 11.5, volume: 150.0 }
        );
        let fresh = Bar { time: 6000, open: 11.5, high: 11.5, low: 11.5, close: 11.5, volume: 5.0 };
        assert_eq!(seen[2], fresh);
        assert_eq!(mux.last_bar(&key()), Some(fresh));
    }

    #[test]
    fn last_bar_survives_consumer_churn_but_not_recreation() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb_a, _) = recorder();
        let (cb_b, seen_b) = recorder();

        mux.subscribe(&key(), "uid-a", cb_a.clone()).unwrap();
        transport.sink(0).data(event(5, Some(10.0), 12.0, 9.0, 11.0, 100.0));

        mux.subscribe(&key(), "uid-b", cb_b.clone()).unwrap();
        mux.unsubscribe(&key(), "uid-a");
        transport.sink(0).data(event(5, None, 13.0, 9.5, 11.5, 150.0));
        assert_eq!(seen_b.lock()[0].open, 10.0);

        mux.unsubscribe(&key(), "uid-b");
        assert!(mux.last_bar(&key()).is_none());

        mux.subscribe(&key(), "uid-b", cb_b).unwrap();
        transport.sink(1).data(event(5, None, 13.0, 9.5, 11.5, 150.0));
        let latest = *seen_b.lock().last().unwrap();
        assert_eq!(latest.open, 11.5);
    }

    #[test]
    fn events_from_released_subscription_are_ignored() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, seen) = recorder();
        mux.subscribe(&key(), "uid-a", cb.clone()).unwrap();
        mux.unsubscribe(&key(), "uid-a");
        mux.subscribe(&key(), "uid-a", cb).unwrap();

        transport.sink(0).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));
        assert!(seen.lock().is_empty());
        transport.sink(1).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn resubscribe_same_id_replaces_callback() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb_old, seen_old) = recorder();
        let (cb_new, seen_new) = recorder();

        mux.subscribe(&key(), "uid-a", cb_old).unwrap();
        mux.subscribe(&key(), "uid-a", cb_new).unwrap();
        assert_eq!(mux.consumer_count(&key()), 1);

        transport.sink(0).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));
        assert!(seen_old.lock().is_empty());
        assert_eq!(seen_new.lock().len(), 1);
    }

    #[test]
    fn consumer_moving_channels_closes_the_old_one() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();
        let minute = ChannelKey::new(key().address, key().network_id, Resolution::M1);

        mux.subscribe(&key(), "uid-a", cb.clone()).unwrap();
        mux.subscribe(&minute, "uid-a", cb).unwrap();
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
        assert_eq!(mux.channel_count(), 1);
        assert!(transport.requests.lock()[1].query.contains("r1 {"));
    }

    #[test]
    fn consumer_unsubscribing_inside_callback() {
        let (transport, mux) = setup(StreamSettings::default());
        let mux_in_cb = mux.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = calls.clone();
        let cb: BarCallback = Arc::new(move |_| {
            calls_in_cb.fetch_add(1, Ordering::SeqCst);
            mux_in_cb.unsubscribe_consumer("uid-a");
        });

        mux.subscribe(&key(), "uid-a", cb).unwrap();
        transport.sink(0).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));
        transport.sink(0).data(event(6, Some(1.0), 1.0, 1.0, 1.0, 1.0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn irrelevant_events_are_swallowed() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, seen) = recorder();
        mux.subscribe(&key(), "uid-a", cb).unwrap();

        transport.sink(0).data(json!({ "onUnconfirmedBarsUpdated": { "aggregates": { "r5S": {} } } }));
        transport.sink(0).data(json!("not even an object"));
        assert!(seen.lock().is_empty());
        assert_eq!(mux.channel_count(), 1);
    }

    #[test]
    fn close_all_releases_every_channel() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();
        let minute = ChannelKey::new(key().address, key().network_id, Resolution::M1);
        mux.subscribe(&key(), "uid-a", cb.clone()).unwrap();
        mux.subscribe(&minute, "uid-b", cb).unwrap();

        mux.close_all();
        assert_eq!(transport.released.load(Ordering::SeqCst), 2);
        assert_eq!(mux.channel_count(), 0);
    }

    #[tokio::test]
    async fn coalescing_dispatches_final_merged_bar_once() {
        let (transport, mux) = setup(StreamSettings {
            coalesce_window: Some(Duration::from_millis(20)),
            ..StreamSettings::default()
        });
        let (cb, seen) = recorder();
        mux.subscribe(&key(), "uid-a", cb).unwrap();
        let sink = transport.sink(0);

        sink.data(event(5, Some(10.0), 12.0, 9.0, 11.0, 100.0));
        sink.data(event(5, None, 13.0, 9.5, 11.5, 150.0));
        sink.data(event(5, None, 12.5, 8.5, 12.0, 175.0));
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            Bar { time: 5000, open: 10.0, high: 13.0, low: 8.5, close: 12.0, volume: 175.0 }
        );
    }

    #[tokio::test]
    async fn coalescing_keeps_the_final_bar_of_a_closed_interval() {
        let (transport, mux) = setup(StreamSettings {
            coalesce_window: Some(Duration::from_millis(20)),
            ..StreamSettings::default()
        });
        let (cb, seen) = recorder();
        mux.subscribe(&key(), "uid-a", cb).unwrap();
        let sink = transport.sink(0);

        sink.data(event(5, Some(10.0), 10.0, 10.0, 10.0, 1.0));
        sink.data(event(5, None, 20.0, 10.0, 20.0, 2.0));
        sink.data(event(6, Some(30.0), 30.0, 30.0, 30.0, 3.0));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            Bar { time: 5000, open: 10.0, high: 20.0, low: 10.0, close: 20.0, volume: 2.0 }
        );
        assert_eq!(
            seen[1],
            Bar { time: 6000, open: 30.0, high: 30.0, low: 30.0, close: 30.0, volume: 3.0 }
        );
    }

    #[test]
    fn panicking_consumer_does_not_starve_its_neighbours() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, seen) = recorder();
        let faulty: BarCallback = Arc::new(|_| panic!("chart widget blew up"));

        mux.subscribe(&key(), "uid-faulty", faulty).unwrap();
        mux.subscribe(&key(), "uid-a", cb).unwrap();
        transport.sink(0).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));
        transport.sink(0).data(event(5, None, 2.0, 1.0, 2.0, 2.0));

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(seen.lock()[1].close, 2.0);
        assert_eq!(mux.consumer_count(&key()), 2);
    }

    #[test]
    fn channel_summaries_report_consumers_and_latest_bar() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();
        let minute = ChannelKey::new(key().address, key().network_id, Resolution::M1);
        mux.subscribe(&key(), "uid-a", cb.clone()).unwrap();
        mux.subscribe(&key(), "uid-b", cb.clone()).unwrap();
        mux.subscribe(&minute, "uid-c", cb).unwrap();
        transport.sink(0).data(event(5, Some(1.0), 1.0, 1.0, 1.0, 1.0));

        let summaries = mux.channel_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].channel, minute.to_string());
        assert_eq!(summaries[0].last_bar_time, None);
        assert_eq!(summaries[1].channel, key().to_string());
        assert_eq!(summaries[1].consumers, 2);
        assert_eq!(summaries[1].last_bar_time, Some(5000));
    }

    #[test]
    fn upstream_completion_requests_reset() {
        let (transport, mux) = setup(StreamSettings::default());
        let (cb, _) = recorder();
        let resets = Arc::new(AtomicUsize::new(0));
        let r = resets.clone();
        let on_reset: ResetCallback = Arc::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        mux.subscribe_with_reset(&key(), "uid-a", cb.clone(), Some(on_reset)).unwrap();
        mux.subscribe(&key(), "uid-b", cb).unwrap();
        transport.sink(0).error(anyhow::anyhow!("stream reset"));
        transport.sink(0).complete();

        assert_eq!(resets.load(Ordering::SeqCst), 2);
        assert_eq!(mux.channel_count(), 1);
    }
}
