// =============================================================================
// Kline Stream Adapter — raw exchange frames to normalized candle updates
// =============================================================================

use anyhow::{Context, Result};

use crate::error::AggregationError;
use crate::market_data::candle_buffer::CandleUpdate;
use crate::types::{Interval, SeriesKey};

/// A frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for RawMessage {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RawMessage {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Turns raw frames into `(series, update)` pairs.
///
/// `Ok(None)` means the frame is not a candle event (acks, other streams) and
/// should be ignored without comment.
pub trait StreamAdapter: Send + Sync {
    fn normalize(
        &self,
        raw: &RawMessage,
    ) -> Result<Option<(SeriesKey, CandleUpdate)>, AggregationError>;
}

// ---------------------------------------------------------------------------
// Binance kline payloads
// ---------------------------------------------------------------------------

/// Adapter for Binance `<symbol>@kline_<interval>` streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinanceKlineAdapter;

impl StreamAdapter for BinanceKlineAdapter {
    fn normalize(
        &self,
        raw: &RawMessage,
    ) -> Result<Option<(SeriesKey, CandleUpdate)>, AggregationError> {
        let text = match raw {
            RawMessage::Text(text) => text.as_str(),
            RawMessage::Binary(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                AggregationError::MalformedMessage(format!("binary frame is not UTF-8: {e}"))
            })?,
        };

        let root: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| AggregationError::MalformedMessage(format!("invalid JSON: {e}")))?;

        parse_kline(&root).map_err(|e| AggregationError::MalformedMessage(format!("{e:#}")))
    }
}

/// Parse either a single-stream payload or a combined-stream envelope.
///
/// Single stream:
/// ```json
/// { "e": "kline", "s": "ETHUSDT", "k": { "t": 1700000000000, "i": "1m", "o": "..", ... } }
/// ```
/// Combined stream wraps the same object as `{ "stream": "..", "data": { .. } }`.
fn parse_kline(root: &serde_json::Value) -> Result<Option<(SeriesKey, CandleUpdate)>> {
    let data = match root.get("data") {
        Some(data) if root.get("stream").is_some() => data,
        _ => root,
    };

    // Subscription acks, pings and other event types carry no kline.
    let Some(k) = data.get("k") else {
        return Ok(None);
    };
    if let Some(event) = data.get("e").and_then(|e| e.as_str()) {
        if event != "kline" {
            return Ok(None);
        }
    }

    // Binance echoes the symbol both outside and inside the kline object.
    let symbol = data
        .get("s")
        .or_else(|| k.get("s"))
        .and_then(|s| s.as_str())
        .context("missing field s")?;

    let interval: Interval = k["i"]
        .as_str()
        .context("missing field k.i")?
        .parse()
        .context("unsupported kline interval")?;

    let key = SeriesKey::new(symbol, interval).context("invalid symbol")?;

    let open_time = parse_i64(&k["t"], "k.t")?;
    let update = CandleUpdate {
        open_time,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
    };

    if !update.has_valid_prices() {
        anyhow::bail!("kline prices must be finite and non-negative");
    }

    Ok(Some((key, update)))
}

fn parse_i64(val: &serde_json::Value, name: &str) -> Result<i64> {
    match val {
        serde_json::Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("field {name} is not an integer")),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as i64: {s}")),
        serde_json::Value::Null => anyhow::bail!("missing field {name}"),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Binance sends prices as JSON strings inside kline objects.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        serde_json::Value::Null => anyhow::bail!("missing field {name}"),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
