//! Created-document counters shared by all tasks of one run
//!
//! Each task registers one slot keyed by `<worker-thread>-<task-id>` and is
//! the only writer of that slot. Readers sum the slots without taking part in
//! any write, so the total is only eventually consistent with in-flight
//! increments. That is good enough for monitoring.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-run document counters
#[derive(Debug, Default)]
pub struct SharedCounters {
    slots: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    node_errors: AtomicU64,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reuse) the slot for a key
    pub fn slot(&self, key: impl Into<String>) -> CounterSlot {
        let key = key.into();
        if let Some(count) = self.slots.read().get(&key) {
            return CounterSlot {
                count: Arc::clone(count),
            };
        }
        let count = Arc::clone(self.slots.write().entry(key).or_default());
        CounterSlot { count }
    }

    /// Sum of every slot
    pub fn total(&self) -> u64 {
        self.slots
            .read()
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Count per slot key, sorted by key
    pub fn by_key(&self) -> Vec<(String, u64)> {
        self.slots
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.load(Ordering::Relaxed)))
            .collect()
    }

    /// Record a failed node creation
    pub fn record_node_error(&self) {
        self.node_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Node creation errors recorded so far
    pub fn node_errors(&self) -> u64 {
        self.node_errors.load(Ordering::Relaxed)
    }

    /// Forget every slot; called at the start of a run
    pub fn reset(&self) {
        self.slots.write().clear();
        self.node_errors.store(0, Ordering::Relaxed);
    }
}

/// Write side of one counter slot
#[derive(Debug, Clone)]
pub struct CounterSlot {
    count: Arc<AtomicU64>,
}

impl CounterSlot {
    /// Add one created document, returning the new slot value
    pub fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
