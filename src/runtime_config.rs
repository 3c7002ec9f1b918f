// =============================================================================
// Runtime Configuration — service settings with atomic save
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// The active series is written back on shutdown so the next start resumes on
// the series the user was last looking at.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::kline_stream::DEFAULT_STREAM_BASE_URL;
use crate::types::{Interval, SeriesKey};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbol() -> String {
    "ethusdt".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "ethusdt".to_string(),
        "bnbusdt".to_string(),
        "dotusdt".to_string(),
    ]
}

fn default_intervals() -> Vec<Interval> {
    vec![
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
    ]
}

fn default_data_dir() -> String {
    "data/series".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_max_candles() -> usize {
    5_000
}

fn default_stream_base_url() -> String {
    DEFAULT_STREAM_BASE_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Series ----------------------------------------------------------------

    /// Symbol shown at startup.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Interval shown at startup.
    #[serde(default)]
    pub interval: Interval,

    /// Symbols the UI may switch between. Empty allows any symbol.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Intervals the UI may switch between. Empty allows any interval.
    #[serde(default = "default_intervals")]
    pub intervals: Vec<Interval>,

    // --- Storage ---------------------------------------------------------------

    /// Persist series to `data_dir`. When false, history lives only for the
    /// process lifetime.
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Candles retained per series, oldest dropped first.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    // --- Network ---------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,

    /// Fixed delay before a dropped stream is reopened.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: Interval::default(),
            symbols: default_symbols(),
            intervals: default_intervals(),
            persist: true,
            data_dir: default_data_dir(),
            max_candles: default_max_candles(),
            bind_addr: default_bind_addr(),
            stream_base_url: default_stream_base_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_SESSION_*` environment overrides. Invalid values are
    /// logged and skipped.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(symbol) = lookup("CANDLE_SESSION_SYMBOL") {
            self.symbol = symbol.trim().to_lowercase();
        }
        if let Some(interval) = lookup("CANDLE_SESSION_INTERVAL") {
            match interval.parse() {
                Ok(iv) => self.interval = iv,
                Err(e) => warn!(error = %e, "ignoring CANDLE_SESSION_INTERVAL"),
            }
        }
        if let Some(addr) = lookup("CANDLE_SESSION_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(dir) = lookup("CANDLE_SESSION_DATA_DIR") {
            self.data_dir = dir;
        }
    }

    /// The series to open at startup.
    pub fn initial_key(&self) -> Result<SeriesKey> {
        SeriesKey::new(&self.symbol, self.interval)
            .with_context(|| format!("invalid startup series {}@{}", self.symbol, self.interval))
    }

    /// Record `key` as the series to resume on next start.
    pub fn remember(&mut self, key: &SeriesKey) {
        self.symbol = key.symbol().to_string();
        self.interval = key.interval();
    }

    /// Whether the UI is allowed to switch to `key`.
    pub fn offers(&self, key: &SeriesKey) -> bool {
        let symbol_ok = self.symbols.is_empty()
            || self
                .symbols
                .iter()
                .any(|s| s.eq_ignore_ascii_case(key.symbol()));
        let interval_ok = self.intervals.is_empty() || self.intervals.contains(&key.interval());
        symbol_ok && interval_ok
    }
}
