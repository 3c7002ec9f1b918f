// =============================================================================
// Kline WebSocket Transport — one connection per subscribed series
// =============================================================================
//
// The transport knows nothing about candles. It opens
// `<base_url>/<symbol>@kline_<interval>`, forwards every text/binary frame to
// the registered raw-message callback, and reconnects after a fixed delay
// when the stream drops. Unsubscribing aborts the connection task.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::market_data::kline_adapter::RawMessage;
use crate::types::SeriesKey;

/// Opaque handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type RawMessageCallback = Arc<dyn Fn(RawMessage) + Send + Sync>;

/// Streaming collaborator consumed by the aggregation controller.
///
/// `subscribe` and `unsubscribe` must not block: they are called while a
/// series switch is in progress.
pub trait Transport: Send + Sync {
    fn subscribe(&self, key: &SeriesKey) -> SubscriptionHandle;
    fn unsubscribe(&self, handle: SubscriptionHandle);
    fn on_raw_message(&self, callback: RawMessageCallback);
}

// ---------------------------------------------------------------------------
// Binance implementation
// ---------------------------------------------------------------------------

pub const DEFAULT_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

pub struct BinanceKlineTransport {
    base_url: String,
    reconnect_delay: Duration,
    callback: Arc<RwLock<Option<RawMessageCallback>>>,
    tasks: Mutex<HashMap<SubscriptionHandle, JoinHandle<()>>>,
    runtime: tokio::runtime::Handle,
}

impl BinanceKlineTransport {
    /// Must be called from within a Tokio runtime; connection tasks are
    /// spawned onto it.
    pub fn new(base_url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            reconnect_delay,
            callback: Arc::new(RwLock::new(None)),
            tasks: Mutex::new(HashMap::new()),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn stream_url(&self, key: &SeriesKey) -> String {
        format!("{}/{}", self.base_url, key.stream_name())
    }

    /// Number of live subscriptions.
    #[cfg(test)]
    pub fn active_subscriptions(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Transport for BinanceKlineTransport {
    fn subscribe(&self, key: &SeriesKey) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new();
        let url = self.stream_url(key);
        info!(handle = %handle, url = %url, "kline subscription opened");
        let callback = self.callback.clone();
        let delay = self.reconnect_delay;
        let key = key.clone();

        let task = self.runtime.spawn(async move {
            loop {
                if let Err(e) = run_kline_stream(&url, &callback).await {
                    error!(key = %key, error = %e, "kline stream error");
                }
                warn!(
                    key = %key,
                    delay_secs = delay.as_secs_f64(),
                    "kline stream closed, reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        });

        self.tasks.lock().insert(handle, task);
        handle
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        match self.tasks.lock().remove(&handle) {
            Some(task) => {
                task.abort();
                info!(handle = %handle, "kline subscription closed");
            }
            None => debug!(handle = %handle, "unsubscribe for unknown handle"),
        }
    }

    fn on_raw_message(&self, callback: RawMessageCallback) {
        *self.callback.write() = Some(callback);
    }
}

impl Drop for BinanceKlineTransport {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

/// Connect once and pump frames into `callback` until the stream ends.
///
/// Returns `Ok(())` on a clean close so the caller decides when to reconnect.
async fn run_kline_stream(
    url: &str,
    callback: &Arc<RwLock<Option<RawMessageCallback>>>,
) -> Result<()> {
    info!(url = %url, "connecting to kline WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    info!(url = %url, "kline WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                let raw = match msg {
                    Message::Text(text) => RawMessage::Text(text),
                    Message::Binary(bytes) => RawMessage::Binary(bytes),
                    // Ping / Pong / Close / Frame -- tungstenite answers pings.
                    _ => continue,
                };
                // Clone out of the lock so a slow consumer never holds it.
                let cb = callback.read().clone();
                match cb {
                    Some(cb) => cb(raw),
                    None => debug!(url = %url, "frame dropped, no raw-message callback"),
                }
            }
            Some(Err(e)) => {
                return Err(e).context("kline WebSocket read error");
            }
            None => {
                warn!(url = %url, "kline WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
