use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::SeriesKey;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One OHLC bar. `open_time` is the bucket start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A normalized kline event as produced by the stream adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl CandleUpdate {
    /// Prices must be finite and non-negative.
    pub fn has_valid_prices(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p >= 0.0)
    }
}

impl From<CandleUpdate> for Candle {
    fn from(u: CandleUpdate) -> Self {
        Self {
            open_time: u.open_time,
            open: u.open,
            high: u.high,
            low: u.low,
            close: u.close,
        }
    }
}

/// Outcome of [`CandleBuffer::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendResult {
    /// A new bucket was appended.
    Appended,
    /// Same bucket as the last candle; the stored candle is left as-is.
    Ignored,
    /// Older than the last candle; history is never rewritten.
    Rejected,
}

impl std::fmt::Display for AppendResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Appended => write!(f, "Appended"),
            Self::Ignored => write!(f, "Ignored"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// CandleBuffer -- ordered, write-once-per-bucket candle series
// ---------------------------------------------------------------------------

/// Buffer handle shared between the session cache and the controller.
pub type SharedBuffer = Arc<RwLock<CandleBuffer>>;

/// Ordered candle history for a single `(symbol, interval)` series.
///
/// `open_time` is strictly increasing across the sequence. The buffer keeps at
/// most `max_candles` entries; the oldest candle is dropped when a new bucket
/// would exceed that.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    key: SeriesKey,
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create an empty buffer for `key`. A `max_candles` of zero is treated
    /// as one.
    pub fn new(key: SeriesKey, max_candles: usize) -> Self {
        let max_candles = max_candles.max(1);
        Self {
            key,
            candles: VecDeque::with_capacity(max_candles.min(1024)),
            max_candles,
        }
    }

    /// Rebuild a buffer from previously stored candles.
    ///
    /// Stored data is not trusted blindly: any candle that does not strictly
    /// advance `open_time` is dropped, and only the newest `max_candles`
    /// survive.
    pub fn from_candles(
        key: SeriesKey,
        candles: impl IntoIterator<Item = Candle>,
        max_candles: usize,
    ) -> Self {
        let mut buffer = Self::new(key, max_candles);
        let mut dropped = 0usize;
        for candle in candles {
            match buffer.candles.back() {
                Some(last) if candle.open_time <= last.open_time => dropped += 1,
                _ => buffer.push_trimmed(candle),
            }
        }
        if dropped > 0 {
            warn!(
                key = %buffer.key,
                dropped,
                "restored series contained non-increasing candles"
            );
        }
        buffer
    }

    /// Apply one update.
    ///
    /// * Empty buffer or newer `open_time` -- append, [`AppendResult::Appended`].
    /// * Same `open_time` as the last candle -- [`AppendResult::Ignored`], the
    ///   in-progress bar is not refined.
    /// * Older `open_time` -- [`AppendResult::Rejected`], buffer untouched.
    pub fn upsert(&mut self, update: CandleUpdate) -> AppendResult {
        let result = match self.candles.back() {
            None => AppendResult::Appended,
            Some(last) if update.open_time > last.open_time => AppendResult::Appended,
            Some(last) if update.open_time == last.open_time => AppendResult::Ignored,
            Some(_) => AppendResult::Rejected,
        };

        if result == AppendResult::Appended {
            self.push_trimmed(update.into());
        }
        debug!(
            key = %self.key,
            open_time = update.open_time,
            result = %result,
            len = self.candles.len(),
            "candle upsert"
        );
        result
    }

    fn push_trimmed(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }

    /// Borrowed, ordered view of the series (oldest first).
    pub fn to_sequence(&self) -> &VecDeque<Candle> {
        &self.candles
    }

    /// Owned copy of the series, for handing across the rendering boundary.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    /// Close of the newest candle, `None` when empty.
    pub fn latest_close(&self) -> Option<f64> {
        self.candles.back().map(|c| c.close)
    }

    /// Open time of the newest candle, `None` when empty.
    pub fn last_open_time(&self) -> Option<i64> {
        self.candles.back().map(|c| c.open_time)
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn update(open_time: i64, close: f64) -> CandleUpdate {
        CandleUpdate {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    fn key() -> SeriesKey {
        SeriesKey::parse("ethusdt", "1m").unwrap()
    }

    #[test]
    fn increasing_updates_append_in_order() {
        let mut buf = CandleBuffer::new(key(), 100);
        for i in 0..10 {
            assert_eq!(
                buf.upsert(update(i * 60_000, 100.0 + i as f64)),
                AppendResult::Appended
            );
        }
        assert_eq!(buf.len(), 10);
        let times: Vec<i64> = buf.to_sequence().iter().map(|c| c.open_time).collect();
        let expected: Vec<i64> = (0..10).map(|i| i * 60_000).collect();
        assert_eq!(times, expected);
        assert_eq!(buf.latest_close(), Some(109.0));
    }

    #[test]
    fn same_open_time_is_ignored() {
        let mut buf = CandleBuffer::new(key(), 100);
        buf.upsert(update(0, 50.0));
        let before = buf.snapshot();

        assert_eq!(buf.upsert(update(0, 55.0)), AppendResult::Ignored);
        assert_eq!(buf.snapshot(), before);
        assert_eq!(buf.latest_close(), Some(50.0));
    }

    #[test]
    fn older_open_time_is_rejected() {
        let mut buf = CandleBuffer::new(key(), 100);
        buf.upsert(update(60_000, 10.0));
        buf.upsert(update(120_000, 11.0));
        let before = buf.snapshot();

        assert_eq!(buf.upsert(update(60_000, 99.0)), AppendResult::Rejected);
        assert_eq!(buf.upsert(update(0, 99.0)), AppendResult::Rejected);
        assert_eq!(buf.snapshot(), before);
    }

    #[test]
    fn second_bucket_then_duplicate() {
        let mut buf = CandleBuffer::new(key(), 100);
        let first = CandleUpdate { open_time: 0, open: 1.0, high: 2.0, low: 3.0, close: 4.0 };
        let second = CandleUpdate { open_time: 5, open: 6.0, high: 7.0, low: 8.0, close: 9.0 };

        assert_eq!(buf.upsert(first), AppendResult::Appended);
        assert_eq!(buf.upsert(second), AppendResult::Appended);
        assert_eq!(buf.upsert(second), AppendResult::Ignored);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.to_sequence()[1], Candle::from(second));
    }

    #[test]
    fn empty_buffer_has_no_close() {
        let buf = CandleBuffer::new(key(), 10);
        assert!(buf.is_empty());
        assert_eq!(buf.latest_close(), None);
        assert_eq!(buf.last_open_time(), None);
    }

    #[test]
    fn retention_cap_drops_oldest() {
        let mut buf = CandleBuffer::new(key(), 3);
        for i in 0..5 {
            buf.upsert(update(i * 60_000, 100.0 + i as f64));
        }
        assert_eq!(buf.len(), 3);
        let closes: Vec<f64> = buf.to_sequence().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);

        // The cap never lets an older bucket back in.
        assert_eq!(buf.upsert(update(0, 1.0)), AppendResult::Rejected);
    }

    #[test]
    fn restore_drops_non_increasing_records() {
        let stored = vec![
            Candle::from(update(0, 1.0)),
            Candle::from(update(60_000, 2.0)),
            Candle::from(update(60_000, 3.0)),
            Candle::from(update(30_000, 4.0)),
            Candle::from(update(120_000, 5.0)),
        ];
        let buf = CandleBuffer::from_candles(key(), stored, 100);
        let times: Vec<i64> = buf.to_sequence().iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![0, 60_000, 120_000]);
        assert_eq!(buf.latest_close(), Some(5.0));
    }

    #[test]
    fn price_validation() {
        assert!(update(0, 1.0).has_valid_prices());
        let mut bad = update(0, 1.0);
        bad.low = -0.5;
        assert!(!bad.has_valid_prices());
        bad.low = f64::NAN;
        assert!(!bad.has_valid_prices());
    }
}
