//! Latest-status handoff between the control loop and readers
//!
//! The control loop publishes a complete snapshot once per tick. Readers get
//! an `Arc` to the most recent one and never observe a half-written update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use qf_protocol::StatusSnapshot;

#[derive(Clone, Default)]
pub struct StatusHandle {
    latest: Arc<Mutex<Option<Arc<StatusSnapshot>>>>,
    published: Arc<AtomicU64>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest snapshot
    pub fn publish(&self, snapshot: StatusSnapshot) -> Arc<StatusSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.latest.lock() = Some(Arc::clone(&snapshot));
        self.published.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Most recent snapshot, `None` before the first tick
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.latest.lock().clone()
    }

    /// Number of snapshots published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
