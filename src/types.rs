// =============================================================================
// Shared types — series identity (symbol + kline interval)
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AggregationError;

/// Kline intervals offered by the exchange stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[default]
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Wire code used in stream names and kline payloads (`k.i`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AggregationError;

    // Case-sensitive: "1m" is a minute, "1M" is a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == trimmed)
            .ok_or_else(|| AggregationError::InvalidSeriesKey(format!("unknown interval: {s:?}")))
    }
}

// ---------------------------------------------------------------------------
// SeriesKey
// ---------------------------------------------------------------------------

/// Composite key that identifies one candle series (and one persisted record).
///
/// Construct through [`SeriesKey::new`], which lowercases the symbol and
/// rejects anything that is not a plain alphanumeric ticker.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeriesKey")]
pub struct SeriesKey {
    symbol: String,
    interval: Interval,
}

#[derive(Deserialize)]
struct RawSeriesKey {
    symbol: String,
    interval: Interval,
}

impl TryFrom<RawSeriesKey> for SeriesKey {
    type Error = AggregationError;

    fn try_from(raw: RawSeriesKey) -> Result<Self, Self::Error> {
        Self::new(&raw.symbol, raw.interval)
    }
}

impl SeriesKey {
    pub fn new(symbol: &str, interval: Interval) -> Result<Self, AggregationError> {
        let symbol = symbol.trim().to_lowercase();
        if symbol.is_empty() {
            return Err(AggregationError::InvalidSeriesKey(
                "symbol must not be empty".into(),
            ));
        }
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AggregationError::InvalidSeriesKey(format!(
                "symbol {symbol:?} must be alphanumeric"
            )));
        }
        Ok(Self { symbol, interval })
    }

    /// Parse a symbol and an interval code, e.g. `("ETHUSDT", "1m")`.
    pub fn parse(symbol: &str, interval: &str) -> Result<Self, AggregationError> {
        Self::new(symbol, interval.parse()?)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Exchange stream name, e.g. `ethusdt@kline_1m`.
    pub fn stream_name(&self) -> String {
        format!("{}@kline_{}", self.symbol, self.interval)
    }

    /// Key under which the series is persisted. `1m` and `1M` must not
    /// collide on case-insensitive filesystems, so the month interval is
    /// spelled out.
    pub fn storage_key(&self) -> String {
        match self.interval {
            Interval::OneMonth => format!("{}_1mo", self.symbol),
            iv => format!("{}_{}", self.symbol, iv),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn symbol_is_lowercased() {
        let key = SeriesKey::parse("ETHUSDT", "1m").unwrap();
        assert_eq!(key.symbol(), "ethusdt");
        assert_eq!(key.interval(), Interval::OneMinute);
        assert_eq!(key.to_string(), "ethusdt@1m");
        assert_eq!(key.stream_name(), "ethusdt@kline_1m");
    }

    #[test]
    fn empty_or_odd_symbols_rejected() {
        assert!(SeriesKey::parse("", "1m").is_err());
        assert!(SeriesKey::parse("   ", "1m").is_err());
        assert!(SeriesKey::parse("eth/usdt", "1m").is_err());
        assert!(SeriesKey::parse("ethusdt", "2m").is_err());
    }

    #[test]
    fn minute_and_month_are_distinct() {
        assert_eq!("1m".parse::<Interval>().unwrap(), Interval::OneMinute);
        assert_eq!("1M".parse::<Interval>().unwrap(), Interval::OneMonth);

        let minute = SeriesKey::parse("btcusdt", "1m").unwrap();
        let month = SeriesKey::parse("btcusdt", "1M").unwrap();
        assert_ne!(minute, month);
        assert_ne!(
            minute.storage_key().to_lowercase(),
            month.storage_key().to_lowercase()
        );
    }

    #[test]
    fn equality_and_hash_cover_both_fields() {
        let mut set = HashSet::new();
        set.insert(SeriesKey::parse("ethusdt", "1m").unwrap());
        set.insert(SeriesKey::parse("ETHUSDT", "1m").unwrap());
        set.insert(SeriesKey::parse("ethusdt", "5m").unwrap());
        set.insert(SeriesKey::parse("bnbusdt", "1m").unwrap());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn serde_uses_wire_codes_and_validates() {
        let key = SeriesKey::parse("dotusdt", "15m").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"symbol":"dotusdt","interval":"15m"}"#);

        let back: SeriesKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        let bad = serde_json::from_str::<SeriesKey>(r#"{"symbol":"","interval":"1m"}"#);
        assert!(bad.is_err());
    }
}
