//! Local bookkeeping for baseline sample counts between syncs.
use std::{collections::HashMap, sync::Mutex};

/// Counts successful deliveries per prompt name since the last successful configuration sync.
///
/// The server-reported `sample_count` is authoritative but lags behind by up to one sync
/// interval. Adding the pending count lets a caller anticipate the next sync without waiting for
/// it. Counters are cleared whenever a sync succeeds, since the fresh snapshot supersedes them.
#[derive(Debug, Default)]
pub struct BaselineTracker {
    pending: Mutex<HashMap<String, u64>>,
}

impl BaselineTracker {
    /// Create a new tracker with no pending deliveries.
    pub fn new() -> BaselineTracker {
        BaselineTracker::default()
    }

    /// Record one successfully delivered log entry for `name`.
    pub fn record_delivery(&self, name: &str) {
        let mut pending = self
            .pending
            .lock()
            .expect("thread holding baseline lock should not panic");
        *pending.entry(name.to_owned()).or_insert(0) += 1;
    }

    /// Number of deliveries for `name` not yet reflected in a sync response.
    pub fn pending(&self, name: &str) -> u64 {
        let pending = self
            .pending
            .lock()
            .expect("thread holding baseline lock should not panic");
        pending.get(name).copied().unwrap_or(0)
    }

    /// Reset all counters after a successful sync.
    pub fn mark_synced(&self) {
        self.pending
            .lock()
            .expect("thread holding baseline lock should not panic")
            .clear();
    }
}
