//! Bounded in-memory history of status snapshots

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qf_protocol::StatusSnapshot;

use crate::constants::limits;

/// Ring buffer of the most recent snapshots, shared between clones
#[derive(Clone)]
pub struct History {
    capacity: usize,
    entries: Arc<Mutex<VecDeque<Arc<StatusSnapshot>>>>,
}

impl History {
    /// Keep roughly `storage_time` worth of snapshots taken every `update_interval`,
    /// at most `MAX_HISTORY_ENTRIES`
    pub fn new(storage_time: Duration, update_interval: Duration) -> Self {
        Self::with_capacity(Self::entries_for(storage_time, update_interval))
    }

    /// Snapshots needed to cover `storage_time`, before capping
    pub fn entries_for(storage_time: Duration, update_interval: Duration) -> usize {
        if update_interval.is_zero() {
            return 1;
        }
        let entries = (storage_time.as_secs_f64() / update_interval.as_secs_f64()).round();
        // Float to int casts saturate
        entries as usize
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, limits::MAX_HISTORY_ENTRIES);
        Self {
            capacity,
            // Grows on demand; the full capacity may never be reached
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn push(&self, snapshot: Arc<StatusSnapshot>) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(snapshot);
    }

    /// Oldest first
    pub fn snapshots(&self) -> Vec<Arc<StatusSnapshot>> {
        self.entries.lock().iter().cloned().collect()
    }
}
