// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the aggregation controller to the HTTP/WebSocket surface. Every
// data-changed event from the controller bumps `state_version` and is fanned
// out on a broadcast channel that WebSocket clients subscribe to.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::controller::{AggregationController, SeriesSnapshot};
use crate::runtime_config::RuntimeConfig;

/// Pending snapshots per WebSocket client before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub struct AppState {
    /// Incremented on every data-changed event.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub controller: Arc<AggregationController>,
    pub updates: broadcast::Sender<Arc<SeriesSnapshot>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, controller: Arc<AggregationController>) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = Arc::new(Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            controller: controller.clone(),
            updates,
            start_time: std::time::Instant::now(),
        });

        let weak = Arc::downgrade(&state);
        controller.on_data_changed(move |snapshot| {
            if let Some(state) = weak.upgrade() {
                state.increment_version();
                // No subscribers is fine.
                let _ = state.updates.send(Arc::new(snapshot.clone()));
            }
        });

        state
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }
}
