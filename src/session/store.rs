// =============================================================================
// Series Store — durable per-series persistence
// =============================================================================
//
// Two layers:
//   - `ByteStore`   opaque get/set of bytes by string key (a directory of files
//                   in production, a map in memory for ephemeral sessions).
//   - `SeriesStore` owns the record format. `JsonSeriesStore` writes one JSON
//                   record per series key on top of any `ByteStore`.
//
// File writes use the tmp + rename pattern so a crash mid-write never leaves a
// truncated record behind.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::market_data::{Candle, CandleBuffer};
use crate::types::SeriesKey;

// =============================================================================
// Byte layer
// =============================================================================

pub trait ByteStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// One file per key under `root`, named `<key>.json`.
pub struct FileByteStore {
    root: PathBuf,
}

impl FileByteStore {
    /// Open (and create if needed) the store directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create series directory {}", root.display()))?;
        info!(root = %root.display(), "file series store opened");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl ByteStore for FileByteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read series file {}", path.display()))
            }
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, value)
            .with_context(|| format!("failed to write tmp series file {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp series file to {}", path.display()))?;
        Ok(())
    }
}

/// Process-lifetime store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryByteStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    #[cfg(test)]
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `set` calls served so far.
    #[cfg(test)]
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }
}

impl ByteStore for MemoryByteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

impl<B: ByteStore + ?Sized> ByteStore for std::sync::Arc<B> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }
}

// =============================================================================
// Series layer
// =============================================================================

/// Durable storage of whole candle series, keyed by [`SeriesKey`].
pub trait SeriesStore: Send + Sync {
    fn save(&self, key: &SeriesKey, buffer: &CandleBuffer) -> Result<()>;
    /// `Ok(None)` when nothing was ever saved for `key`.
    fn load(&self, key: &SeriesKey) -> Result<Option<CandleBuffer>>;
}

const RECORD_VERSION: u32 = 1;

#[derive(Serialize)]
struct SeriesRecordRef<'a> {
    version: u32,
    key: &'a SeriesKey,
    saved_at: DateTime<Utc>,
    candles: &'a VecDeque<Candle>,
}

#[derive(Deserialize)]
struct SeriesRecord {
    version: u32,
    key: SeriesKey,
    saved_at: DateTime<Utc>,
    candles: Vec<Candle>,
}

/// JSON records on top of a [`ByteStore`].
///
/// `open_time` is written as an integer and prices as JSON numbers using the
/// shortest round-trip representation, so a save/load cycle is lossless.
pub struct JsonSeriesStore<B> {
    bytes: B,
    max_candles: usize,
}

impl<B: ByteStore> JsonSeriesStore<B> {
    /// `max_candles` is applied to restored buffers.
    pub fn new(bytes: B, max_candles: usize) -> Self {
        Self { bytes, max_candles }
    }
}

impl<B: ByteStore> SeriesStore for JsonSeriesStore<B> {
    fn save(&self, key: &SeriesKey, buffer: &CandleBuffer) -> Result<()> {
        if buffer.key() != key {
            anyhow::bail!("refusing to store series {} under {key}", buffer.key());
        }
        let record = SeriesRecordRef {
            version: RECORD_VERSION,
            key,
            saved_at: Utc::now(),
            candles: buffer.to_sequence(),
        };
        let payload = serde_json::to_vec(&record)
            .with_context(|| format!("failed to serialise series {key}"))?;
        self.bytes
            .set(&key.storage_key(), &payload)
            .with_context(|| format!("failed to store series {key}"))?;
        debug!(key = %key, candles = buffer.len(), bytes = payload.len(), "series saved");
        Ok(())
    }

    fn load(&self, key: &SeriesKey) -> Result<Option<CandleBuffer>> {
        let Some(payload) = self
            .bytes
            .get(&key.storage_key())
            .with_context(|| format!("failed to fetch series {key}"))?
        else {
            return Ok(None);
        };

        let record: SeriesRecord = serde_json::from_slice(&payload)
            .with_context(|| format!("failed to parse stored series {key}"))?;

        if record.version != RECORD_VERSION {
            anyhow::bail!(
                "stored series {key} has unsupported record version {}",
                record.version
            );
        }
        if &record.key != key {
            anyhow::bail!("stored record for {key} belongs to {}", record.key);
        }

        debug!(
            key = %key,
            candles = record.candles.len(),
            saved_at = %record.saved_at,
            "series loaded"
        );
        Ok(Some(CandleBuffer::from_candles(
            record.key,
            record.candles,
            self.max_candles,
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
