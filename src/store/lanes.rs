//! Per-id write serialization
//!
//! Each task id gets its own lane: a FIFO mutex that admits one writer at a
//! time. Lanes for different ids never contend. A lane is dropped from the
//! registry once nobody holds or waits on it, and recreated on the next write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type Lane = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct WriteLanes {
    lanes: Mutex<HashMap<String, Lane>>,
}

/// Exclusive turn on one id's lane; releases on drop
#[derive(Debug)]
pub struct LaneGuard<'a> {
    registry: &'a WriteLanes,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl WriteLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this id's turn. Writers for the same id are admitted in arrival order.
    pub async fn acquire(&self, id: &str) -> LaneGuard<'_> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            lanes
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lane.lock_owned().await;
        LaneGuard {
            registry: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of live lanes
    pub fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, id: &str) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        // Only the registry's own reference left: nobody holds or waits on this lane
        if let Some(lane) = lanes.get(id)
            && Arc::strong_count(lane) == 1
        {
            lanes.remove(id);
            debug!("Released write lane for {}", id);
        }
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so the strong count reflects only waiters
        drop(self.guard.take());
        self.registry.release(&self.id);
    }
}
