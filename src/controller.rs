// =============================================================================
// Aggregation Controller — subscription lifecycle and message routing
// =============================================================================
//
// State machine:
//   Idle --start(k)--> Subscribed(k)
//   Subscribed(a) --switch(b)--> Switching(a, b) --> Subscribed(b)
//   any --stop()--> Idle
//
// Raw frames go adapter -> series filter -> active buffer. Frames for any
// series other than the subscribed one are stale leftovers of a previous
// subscription and are dropped silently.
//
// Locking (parking_lot):
//   lifecycle  Mutex<()>            serialises start / switch / stop
//   cache      Mutex<SessionCache>  active key + warm map
//   inner      RwLock<Inner>        phase, displayed buffer, latest price
//   buffer     RwLock<CandleBuffer> one per series
//
//   Order is lifecycle -> cache -> buffer, and inner -> buffer. The cache
//   mutex and the inner lock are never held together. Listeners run after
//   every lock has been released.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AggregationError;
use crate::market_data::{
    AppendResult, Candle, RawMessage, SharedBuffer, StreamAdapter, SubscriptionHandle, Transport,
};
use crate::session::SessionCache;
use crate::types::SeriesKey;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Subscribed { key: SeriesKey },
    Switching { from: SeriesKey, to: SeriesKey },
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Subscribed { key } => write!(f, "Subscribed({key})"),
            Self::Switching { from, to } => write!(f, "Switching({from} -> {to})"),
        }
    }
}

/// What the rendering side sees: the whole visible series plus the price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub key: Option<SeriesKey>,
    pub phase: ControllerPhase,
    pub candles: Vec<Candle>,
    pub latest_price: Option<f64>,
}

/// Fate of one raw frame handed to [`AggregationController::on_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Appended a new candle; listeners were notified.
    Accepted,
    /// Same bucket as the last candle.
    Ignored,
    /// Older than the last candle.
    Rejected,
    /// Candle for a series other than the subscribed one.
    Stale,
    /// Candle-shaped but unparseable.
    Malformed,
    /// Not a candle message at all.
    Skipped,
    /// No subscription is live (idle or mid-switch).
    Inactive,
}

pub type DataChangedListener = Arc<dyn Fn(&SeriesSnapshot) + Send + Sync>;

/// Ingestion counters since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub stale: u64,
    pub malformed: u64,
    pub skipped: u64,
    pub inactive: u64,
    pub switches: u64,
}

#[derive(Default)]
struct IngestCounters {
    accepted: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    malformed: AtomicU64,
    skipped: AtomicU64,
    inactive: AtomicU64,
    switches: AtomicU64,
}

impl IngestCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            inactive: self.inactive.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Inner {
    phase: ControllerPhase,
    buffer: Option<SharedBuffer>,
    latest_price: Option<f64>,
    subscription: Option<SubscriptionHandle>,
}

pub struct AggregationController {
    adapter: Box<dyn StreamAdapter>,
    transport: Arc<dyn Transport>,
    lifecycle: Mutex<()>,
    cache: Mutex<SessionCache>,
    inner: RwLock<Inner>,
    listeners: RwLock<Vec<DataChangedListener>>,
    counters: IngestCounters,
}

impl AggregationController {
    pub fn new(
        adapter: Box<dyn StreamAdapter>,
        transport: Arc<dyn Transport>,
        cache: SessionCache,
    ) -> Self {
        Self {
            adapter,
            transport,
            lifecycle: Mutex::new(()),
            cache: Mutex::new(cache),
            inner: RwLock::new(Inner {
                phase: ControllerPhase::Idle,
                buffer: None,
                latest_price: None,
                subscription: None,
            }),
            listeners: RwLock::new(Vec::new()),
            counters: IngestCounters::default(),
        }
    }

    /// Route the transport's raw frames into [`Self::on_message`].
    ///
    /// The callback holds a weak reference so the transport does not keep the
    /// controller alive.
    pub fn bind_transport(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.transport.on_raw_message(Arc::new(move |raw| {
            if let Some(controller) = weak.upgrade() {
                controller.on_message(&raw);
            }
        }));
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Subscribe to `initial`. When already running this is a switch.
    pub fn start(&self, initial: &SeriesKey) {
        let _guard = self.lifecycle.lock();
        self.transition(initial);
    }

    /// Move to `new_key`. Switching to the current key is a no-op.
    pub fn switch_series(&self, new_key: &SeriesKey) {
        let _guard = self.lifecycle.lock();
        self.transition(new_key);
    }

    /// UI entry point; same as [`Self::switch_series`].
    pub fn request_switch(&self, new_key: &SeriesKey) {
        self.switch_series(new_key);
    }

    /// Tear down the subscription and persist the active series.
    pub fn stop(&self) {
        let _guard = self.lifecycle.lock();

        let handle = {
            let mut inner = self.inner.write();
            if inner.phase == ControllerPhase::Idle {
                debug!("stop requested while idle");
                return;
            }
            inner.phase = ControllerPhase::Idle;
            inner.buffer = None;
            inner.latest_price = None;
            inner.subscription.take()
        };

        if let Some(handle) = handle {
            self.transport.unsubscribe(handle);
        }
        let retired = {
            let mut cache = self.cache.lock();
            let retired = cache.current_key();
            cache.deactivate();
            retired
        };
        if let Some(key) = retired {
            info!(key = %key, "aggregation stopped");
        }
    }

    /// Caller must hold `lifecycle`.
    fn transition(&self, target: &SeriesKey) {
        let (from, old_handle) = {
            let mut inner = self.inner.write();
            let from = match &inner.phase {
                ControllerPhase::Subscribed { key } if key == target => {
                    debug!(key = %target, "already subscribed, switch ignored");
                    return;
                }
                ControllerPhase::Subscribed { key } => Some(key.clone()),
                ControllerPhase::Idle => None,
                // Only reachable if a previous transition panicked midway.
                ControllerPhase::Switching { from, to } => {
                    warn!(from = %from, to = %to, "recovering from interrupted switch");
                    Some(from.clone())
                }
            };
            if let Some(from) = &from {
                inner.phase = ControllerPhase::Switching {
                    from: from.clone(),
                    to: target.clone(),
                };
            }
            inner.buffer = None;
            inner.latest_price = None;
            (from, inner.subscription.take())
        };

        let buffer = self.cache.lock().activate(target);

        if let Some(handle) = old_handle {
            self.transport.unsubscribe(handle);
        }
        let handle = self.transport.subscribe(target);

        let snapshot = {
            let mut inner = self.inner.write();
            let (candles, latest_close) = {
                let buf = buffer.read();
                (buf.snapshot(), buf.latest_close())
            };
            inner.phase = ControllerPhase::Subscribed {
                key: target.clone(),
            };
            inner.buffer = Some(buffer);
            inner.latest_price = latest_close;
            inner.subscription = Some(handle);
            SeriesSnapshot {
                key: Some(target.clone()),
                phase: inner.phase.clone(),
                candles,
                latest_price: latest_close,
            }
        };

        IngestCounters::bump(&self.counters.switches);
        match from {
            Some(from) => info!(
                from = %from,
                to = %target,
                candles = snapshot.candles.len(),
                "series switched"
            ),
            None => info!(key = %target, candles = snapshot.candles.len(), "aggregation started"),
        }
        self.notify(&snapshot);
    }

    // ── Message path ────────────────────────────────────────────────────

    /// Feed one raw transport frame through the adapter into the active
    /// buffer.
    pub fn on_message(&self, raw: &RawMessage) -> MessageOutcome {
        let (key, update) = match self.adapter.normalize(raw) {
            Ok(Some(normalized)) => normalized,
            Ok(None) => {
                IngestCounters::bump(&self.counters.skipped);
                return MessageOutcome::Skipped;
            }
            Err(e) => {
                IngestCounters::bump(&self.counters.malformed);
                debug!(error = %e, "dropping message");
                return MessageOutcome::Malformed;
            }
        };

        let snapshot = {
            let mut inner = self.inner.write();

            let active = match &inner.phase {
                ControllerPhase::Subscribed { key } => key.clone(),
                _ => {
                    IngestCounters::bump(&self.counters.inactive);
                    debug!(key = %key, phase = %inner.phase, "no live subscription, dropping update");
                    return MessageOutcome::Inactive;
                }
            };
            if active != key {
                IngestCounters::bump(&self.counters.stale);
                let err = AggregationError::StaleSeriesMessage {
                    expected: active,
                    got: key,
                };
                debug!(error = %err, "dropping update");
                return MessageOutcome::Stale;
            }
            let Some(buffer) = inner.buffer.clone() else {
                IngestCounters::bump(&self.counters.inactive);
                return MessageOutcome::Inactive;
            };

            let mut buf = buffer.write();
            let result = buf.upsert(update);
            match result {
                AppendResult::Appended => {
                    IngestCounters::bump(&self.counters.accepted);
                    inner.latest_price = Some(update.close);
                    SeriesSnapshot {
                        key: Some(active),
                        phase: inner.phase.clone(),
                        candles: buf.snapshot(),
                        latest_price: inner.latest_price,
                    }
                }
                AppendResult::Ignored => {
                    IngestCounters::bump(&self.counters.ignored);
                    return MessageOutcome::Ignored;
                }
                AppendResult::Rejected => {
                    IngestCounters::bump(&self.counters.rejected);
                    let err = AggregationError::OutOfOrderUpdate {
                        last_open_time: buf.last_open_time().unwrap_or_default(),
                        got: update.open_time,
                    };
                    debug!(key = %active, error = %err, "dropping update");
                    return MessageOutcome::Rejected;
                }
            }
        };

        self.notify(&snapshot);
        MessageOutcome::Accepted
    }

    // ── Rendering side ──────────────────────────────────────────────────

    /// Register a listener fired after every accepted update and every
    /// completed switch, with the full visible series.
    pub fn on_data_changed(&self, listener: impl Fn(&SeriesSnapshot) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    fn notify(&self, snapshot: &SeriesSnapshot) {
        let listeners: Vec<DataChangedListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(snapshot);
        }
    }

    /// Copy of the displayed series, oldest first. Empty when idle.
    pub fn visible_sequence(&self) -> Vec<Candle> {
        let inner = self.inner.read();
        inner
            .buffer
            .as_ref()
            .map(|b| b.read().snapshot())
            .unwrap_or_default()
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.inner.read().latest_price
    }

    pub fn phase(&self) -> ControllerPhase {
        self.inner.read().phase.clone()
    }

    /// The subscribed series, if any.
    pub fn current_key(&self) -> Option<SeriesKey> {
        match &self.inner.read().phase {
            ControllerPhase::Subscribed { key } => Some(key.clone()),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        let inner = self.inner.read();
        let key = match &inner.phase {
            ControllerPhase::Subscribed { key } => Some(key.clone()),
            _ => None,
        };
        SeriesSnapshot {
            key,
            phase: inner.phase.clone(),
            candles: inner
                .buffer
                .as_ref()
                .map(|b| b.read().snapshot())
                .unwrap_or_default(),
            latest_price: inner.latest_price,
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::kline_stream::testing::RecordingTransport;
    use crate::market_data::{BinanceKlineAdapter, CandleBuffer, CandleUpdate, RawMessageCallback};
    use crate::session::{ByteStore, JsonSeriesStore, MemoryByteStore, SeriesStore};

    struct Harness {
        controller: Arc<AggregationController>,
        transport: Arc<RecordingTransport>,
        bytes: Arc<MemoryByteStore>,
        events: Arc<Mutex<Vec<SeriesSnapshot>>>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let bytes = Arc::new(MemoryByteStore::new());
        let store: Arc<dyn SeriesStore> = Arc::new(JsonSeriesStore::new(bytes.clone(), 1_000));
        let cache = SessionCache::new(store, 1_000);
        let controller = Arc::new(AggregationController::new(
            Box::new(BinanceKlineAdapter),
            transport.clone(),
            cache,
        ));
        controller.bind_transport();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        controller.on_data_changed(move |snap| sink.lock().push(snap.clone()));

        Harness {
            controller,
            transport,
            bytes,
            events,
        }
    }

    fn key(sym: &str, iv: &str) -> SeriesKey {
        SeriesKey::parse(sym, iv).unwrap()
    }

    fn kline(symbol: &str, interval: &str, open_time: i64, close: f64) -> String {
        format!(
            r#"{{"e":"kline","s":"{symbol}","k":{{"t":{open_time},"i":"{interval}","o":"{close}","h":"{close}","l":"{close}","c":"{close}","x":false}}}}"#
        )
    }

    #[test]
    fn starts_idle() {
        let h = harness();
        assert_eq!(h.controller.phase(), ControllerPhase::Idle);
        assert!(h.controller.visible_sequence().is_empty());
        assert_eq!(h.controller.latest_price(), None);
        let msg = kline("ETHUSDT", "1m", 0, 1.0);
        assert_eq!(h.controller.on_message(&RawMessage::from(msg.as_str())), MessageOutcome::Inactive);
    }

    #[test]
    fn start_subscribes_and_accepts_updates() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        h.controller.start(&eth);

        assert_eq!(h.controller.phase(), ControllerPhase::Subscribed { key: eth.clone() });
        assert_eq!(h.transport.live_keys(), vec![eth.clone()]);

        h.transport.deliver(&kline("ETHUSDT", "1m", 0, 100.0));
        h.transport.deliver(&kline("ETHUSDT", "1m", 60_000, 101.0));

        assert_eq!(h.controller.visible_sequence().len(), 2);
        assert_eq!(h.controller.latest_price(), Some(101.0));
        // One event for the start, one per accepted update.
        assert_eq!(h.events.lock().len(), 3);
        assert_eq!(h.events.lock().last().unwrap().candles.len(), 2);
    }

    #[test]
    fn ignored_and_rejected_updates_do_not_signal() {
        let h = harness();
        h.controller.start(&key("ethusdt", "1m"));
        h.transport.deliver(&kline("ETHUSDT", "1m", 60_000, 100.0));
        let events_before = h.events.lock().len();

        let same = kline("ETHUSDT", "1m", 60_000, 105.0);
        let older = kline("ETHUSDT", "1m", 0, 99.0);
        assert_eq!(h.controller.on_message(&RawMessage::from(same.as_str())), MessageOutcome::Ignored);
        assert_eq!(h.controller.on_message(&RawMessage::from(older.as_str())), MessageOutcome::Rejected);

        assert_eq!(h.events.lock().len(), events_before);
        assert_eq!(h.controller.latest_price(), Some(100.0));
        assert_eq!(h.controller.visible_sequence().len(), 1);

        let stats = h.controller.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn stale_and_malformed_messages_are_dropped() {
        let h = harness();
        h.controller.start(&key("ethusdt", "1m"));

        let other_symbol = kline("BNBUSDT", "1m", 0, 300.0);
        let other_interval = kline("ETHUSDT", "5m", 0, 300.0);
        assert_eq!(h.controller.on_message(&RawMessage::from(other_symbol.as_str())), MessageOutcome::Stale);
        assert_eq!(h.controller.on_message(&RawMessage::from(other_interval.as_str())), MessageOutcome::Stale);
        assert_eq!(h.controller.on_message(&RawMessage::from("{oops")), MessageOutcome::Malformed);
        assert_eq!(
            h.controller.on_message(&RawMessage::from(r#"{"result":null,"id":7}"#)),
            MessageOutcome::Skipped
        );

        assert!(h.controller.visible_sequence().is_empty());
        assert_eq!(h.controller.latest_price(), None);
        let stats = h.controller.stats();
        assert_eq!(stats.stale, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn switch_round_trip_restores_history_and_price() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        let bnb = key("bnbusdt", "1m");

        h.controller.start(&eth);
        for (i, close) in [2000.0, 2001.5, 2003.25].iter().enumerate() {
            h.transport.deliver(&kline("ETHUSDT", "1m", i as i64 * 60_000, *close));
        }
        let eth_history = h.controller.visible_sequence();
        assert_eq!(eth_history.len(), 3);

        h.controller.switch_series(&bnb);
        assert_eq!(h.controller.latest_price(), None);
        assert!(h.controller.visible_sequence().is_empty());
        assert_eq!(h.transport.live_keys(), vec![bnb.clone()]);

        // A late ETH frame from the torn-down subscription.
        h.transport.deliver(&kline("ETHUSDT", "1m", 180_000, 9999.0));
        assert!(h.controller.visible_sequence().is_empty());

        let gets_before = h.bytes.get_count();
        h.controller.switch_series(&eth);
        assert_eq!(h.bytes.get_count(), gets_before);
        assert_eq!(h.controller.visible_sequence(), eth_history);
        assert_eq!(h.controller.latest_price(), Some(2003.25));
        assert_eq!(h.transport.live_keys(), vec![eth]);
    }

    #[test]
    fn switching_to_current_series_is_a_no_op() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        h.controller.start(&eth);
        h.transport.deliver(&kline("ETHUSDT", "1m", 0, 10.0));
        let events_before = h.events.lock().len();
        let subs_before = h.transport.subscribed.lock().len();

        h.controller.request_switch(&eth);

        assert_eq!(h.events.lock().len(), events_before);
        assert_eq!(h.transport.subscribed.lock().len(), subs_before);
        assert_eq!(h.controller.latest_price(), Some(10.0));
        assert_eq!(h.controller.visible_sequence().len(), 1);
    }

    #[test]
    fn interval_switch_keeps_separate_histories() {
        let h = harness();
        let one = key("ethusdt", "1m");
        let five = key("ethusdt", "5m");

        h.controller.start(&one);
        h.transport.deliver(&kline("ETHUSDT", "1m", 0, 1.0));
        h.transport.deliver(&kline("ETHUSDT", "1m", 60_000, 2.0));

        h.controller.switch_series(&five);
        h.transport.deliver(&kline("ETHUSDT", "5m", 0, 7.0));
        assert_eq!(h.controller.visible_sequence().len(), 1);

        h.controller.switch_series(&one);
        assert_eq!(h.controller.visible_sequence().len(), 2);
    }

    #[test]
    fn stop_persists_and_goes_idle() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        h.controller.start(&eth);
        h.transport.deliver(&kline("ETHUSDT", "1m", 0, 10.0));
        let sets_before = h.bytes.set_count();

        h.controller.stop();

        assert_eq!(h.controller.phase(), ControllerPhase::Idle);
        assert!(h.transport.live_keys().is_empty());
        assert_eq!(h.bytes.set_count(), sets_before + 1);
        assert_eq!(h.controller.latest_price(), None);
        assert!(h.bytes.get(&eth.storage_key()).unwrap().is_some());

        // Restart picks the series back up.
        h.controller.start(&eth);
        assert_eq!(h.controller.visible_sequence().len(), 1);
        assert_eq!(h.controller.latest_price(), Some(10.0));
    }

    #[test]
    fn concurrent_messages_and_switches_keep_series_ordered() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        let bnb = key("bnbusdt", "1m");
        h.controller.start(&eth);

        let feeders: Vec<_> = ["ETHUSDT", "BNBUSDT"]
            .into_iter()
            .map(|symbol| {
                let controller = h.controller.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let msg = kline(symbol, "1m", i * 60_000, i as f64);
                        controller.on_message(&RawMessage::from(msg.as_str()));
                    }
                })
            })
            .collect();

        for i in 0..20 {
            let target = if i % 2 == 0 { &bnb } else { &eth };
            h.controller.switch_series(target);
        }
        for f in feeders {
            f.join().unwrap();
        }

        for target in [&eth, &bnb] {
            h.controller.switch_series(target);
            let seq = h.controller.visible_sequence();
            assert!(seq.windows(2).all(|w| w[0].open_time < w[1].open_time));
        }
    }

    /// Feeds queued frames to the controller from inside `subscribe`, while
    /// the switch that called it is still in flight.
    #[derive(Default)]
    struct MidSwitchTransport {
        controller: Mutex<Weak<AggregationController>>,
        pending: Mutex<Vec<String>>,
        outcomes: Mutex<Vec<MessageOutcome>>,
    }

    impl Transport for MidSwitchTransport {
        fn subscribe(&self, _key: &SeriesKey) -> SubscriptionHandle {
            let frames = std::mem::take(&mut *self.pending.lock());
            let controller = self.controller.lock().upgrade();
            if let Some(controller) = controller {
                for frame in frames {
                    let outcome = controller.on_message(&RawMessage::from(frame));
                    self.outcomes.lock().push(outcome);
                }
            }
            SubscriptionHandle::new()
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) {}

        fn on_raw_message(&self, _callback: RawMessageCallback) {}
    }

    #[test]
    fn frames_arriving_mid_switch_are_dropped_as_inactive() {
        let transport = Arc::new(MidSwitchTransport::default());
        let store: Arc<dyn SeriesStore> =
            Arc::new(JsonSeriesStore::new(MemoryByteStore::new(), 1_000));
        let controller = Arc::new(AggregationController::new(
            Box::new(BinanceKlineAdapter),
            transport.clone(),
            SessionCache::new(store, 1_000),
        ));
        *transport.controller.lock() = Arc::downgrade(&controller);
        let eth = key("ethusdt", "1m");
        let bnb = key("bnbusdt", "1m");

        controller.start(&eth);
        for (i, close) in [10.0, 11.0].into_iter().enumerate() {
            let msg = kline("ETHUSDT", "1m", i as i64 * 60_000, close);
            assert_eq!(controller.on_message(&RawMessage::from(msg)), MessageOutcome::Accepted);
        }

        // One frame for each side of the switch, both landing mid-flight.
        *transport.pending.lock() = vec![
            kline("ETHUSDT", "1m", 120_000, 12.0),
            kline("BNBUSDT", "1m", 0, 300.0),
        ];
        controller.switch_series(&bnb);

        assert_eq!(
            *transport.outcomes.lock(),
            vec![MessageOutcome::Inactive, MessageOutcome::Inactive]
        );
        assert_eq!(controller.stats().inactive, 2);
        assert_eq!(controller.stats().accepted, 2);
        assert!(controller.visible_sequence().is_empty());
        assert_eq!(controller.latest_price(), None);

        controller.switch_series(&eth);
        let closes: Vec<f64> = controller.visible_sequence().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![10.0, 11.0]);
        assert_eq!(controller.latest_price(), Some(11.0));
    }

    #[test]
    fn cold_store_restore_seeds_latest_price() {
        let h = harness();
        let eth = key("ethusdt", "1m");
        let mut stored = CandleBuffer::new(eth.clone(), 1_000);
        for (i, close) in [5.0, 6.0, 7.5].into_iter().enumerate() {
            stored.upsert(CandleUpdate {
                open_time: i as i64 * 60_000,
                open: close,
                high: close,
                low: close,
                close,
            });
        }
        JsonSeriesStore::new(h.bytes.clone(), 1_000)
            .save(&eth, &stored)
            .unwrap();
        let gets_before = h.bytes.get_count();

        h.controller.start(&eth);

        // Came from the store, not the warm cache.
        assert_eq!(h.bytes.get_count(), gets_before + 1);
        assert_eq!(h.controller.visible_sequence().len(), 3);
        assert_eq!(h.controller.latest_price(), Some(7.5));
        assert_eq!(h.events.lock().last().unwrap().latest_price, Some(7.5));
    }
}
