// =============================================================================
// Session Cache — one candle buffer per visited series
// =============================================================================
//
// Holds the active series key plus a warm map of every series visited during
// this session. Switching series:
//   1. saves the outgoing buffer to the series store,
//   2. keeps the outgoing buffer warm in memory for the rest of the session,
//   3. resolves the incoming buffer: warm map -> store -> empty,
//   4. marks the incoming key active.
//
// Store failures never fail a switch. A buffer whose save failed is still warm
// (it is the only copy); a failed load yields an empty buffer.
//
// Not internally synchronised: the controller owns it behind one mutex and
// takes buffer locks only while holding that mutex.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::AggregationError;
use crate::market_data::{CandleBuffer, SharedBuffer};
use crate::session::store::SeriesStore;
use crate::types::SeriesKey;

/// Every series visited in this session stays in `warm` until the process
/// exits, so returning to one never goes back to the store.
pub struct SessionCache {
    store: Arc<dyn SeriesStore>,
    max_candles: usize,
    active: Option<SeriesKey>,
    warm: HashMap<SeriesKey, SharedBuffer>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SeriesStore>, max_candles: usize) -> Self {
        Self {
            store,
            max_candles,
            active: None,
            warm: HashMap::new(),
        }
    }

    /// Make `key` the active series and return its buffer.
    ///
    /// Activating the already-active key returns the same buffer instance and
    /// touches nothing else.
    pub fn activate(&mut self, key: &SeriesKey) -> SharedBuffer {
        if self.active.as_ref() == Some(key) {
            if let Some(buffer) = self.warm.get(key) {
                return buffer.clone();
            }
        }

        self.retire_active();
        let buffer = self.resolve(key);
        self.active = Some(key.clone());
        buffer
    }

    /// Persist the active series, leaving no series active. Its buffer stays
    /// warm.
    pub fn deactivate(&mut self) {
        self.retire_active();
    }

    pub fn current_key(&self) -> Option<SeriesKey> {
        self.active.clone()
    }

    /// Save the active buffer; it stays warm whether or not the save worked.
    fn retire_active(&mut self) {
        let Some(outgoing) = self.active.take() else {
            return;
        };
        let Some(buffer) = self.warm.get(&outgoing) else {
            return;
        };

        let result = {
            let buffer = buffer.read();
            self.store.save(&outgoing, &buffer).map(|()| buffer.len())
        };
        match result {
            Ok(len) => info!(key = %outgoing, candles = len, "series persisted"),
            Err(e) => warn!(
                key = %outgoing,
                error = %AggregationError::persistence(&e),
                "series save failed, keeping in memory only"
            ),
        }
    }

    fn resolve(&mut self, key: &SeriesKey) -> SharedBuffer {
        if let Some(buffer) = self.warm.get(key) {
            debug!(key = %key, "series restored from warm cache");
            return buffer.clone();
        }

        let buffer = match self.store.load(key) {
            Ok(Some(buffer)) if buffer.is_empty() => {
                debug!(key = %key, "stored series has no candles");
                buffer
            }
            Ok(Some(buffer)) => {
                info!(key = %key, candles = buffer.len(), "series restored from store");
                buffer
            }
            Ok(None) => {
                debug!(key = %key, "no stored series, starting empty");
                CandleBuffer::new(key.clone(), self.max_candles)
            }
            Err(e) => {
                warn!(
                    key = %key,
                    error = %AggregationError::persistence(&e),
                    "series load failed, starting empty"
                );
                CandleBuffer::new(key.clone(), self.max_candles)
            }
        };

        let shared: SharedBuffer = Arc::new(RwLock::new(buffer));
        self.warm.insert(key.clone(), shared.clone());
        shared
    }
}

// =============================================================================
// Tests
// =============================================================================
