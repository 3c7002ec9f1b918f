// =============================================================================
// Aggregation error kinds
// =============================================================================
//
// None of these is fatal to the controller. Message-path errors are counted
// and dropped; persistence errors degrade to warm-cache-only retention or an
// empty buffer; key errors are reported back to whoever asked for the key.
// =============================================================================

use crate::types::SeriesKey;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// The adapter could not parse a candle message.
    MalformedMessage(String),
    /// A well-formed update for a series other than the subscribed one.
    StaleSeriesMessage { expected: SeriesKey, got: SeriesKey },
    /// The update's open time is older than the last candle in the buffer.
    OutOfOrderUpdate { last_open_time: i64, got: i64 },
    /// A save or load against the series store failed.
    PersistenceFailure(String),
    /// Symbol or interval did not form a valid series key.
    InvalidSeriesKey(String),
}

impl std::fmt::Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedMessage(msg) => write!(f, "malformed_message: {msg}"),
            Self::StaleSeriesMessage { expected, got } => {
                write!(f, "stale_series_message: expected {expected}, got {got}")
            }
            Self::OutOfOrderUpdate {
                last_open_time,
                got,
            } => write!(
                f,
                "out_of_order_update: open_time {got} is before last open_time {last_open_time}"
            ),
            Self::PersistenceFailure(msg) => write!(f, "persistence_failure: {msg}"),
            Self::InvalidSeriesKey(msg) => write!(f, "invalid_series_key: {msg}"),
        }
    }
}

impl std::error::Error for AggregationError {}

impl AggregationError {
    /// Wrap any error chain from the store layer.
    pub fn persistence(err: &anyhow::Error) -> Self {
        Self::PersistenceFailure(format!("{err:#}"))
    }
}
