//! Per-index transfer counters shared by readers and writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use essync_types::IndexTask;
use serde::Serialize;

/// Lock-free counters for one index task.
#[derive(Debug, Default)]
pub struct IndexCounters {
    read: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    batches_read: AtomicU64,
    batches_written: AtomicU64,
}

impl IndexCounters {
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches_read: self.batches_read.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IndexCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub read: u64,
    pub written: u64,
    pub dropped: u64,
    pub batches_read: u64,
    pub batches_written: u64,
}

impl std::ops::Add for CounterSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            read: self.read + rhs.read,
            written: self.written + rhs.written,
            dropped: self.dropped + rhs.dropped,
            batches_read: self.batches_read + rhs.batches_read,
            batches_written: self.batches_written + rhs.batches_written,
        }
    }
}

/// Fixed map from task key to counters, built once before the transfer
/// starts.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    order: Vec<String>,
    counters: HashMap<String, Arc<IndexCounters>>,
}

impl StatsRegistry {
    /// Registry with one entry per distinct key, in first-seen order.
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut registry = Self::default();
        for key in keys {
            let key = key.into();
            if !registry.counters.contains_key(&key) {
                registry
                    .counters
                    .insert(key.clone(), Arc::new(IndexCounters::default()));
                registry.order.push(key);
            }
        }
        registry
    }

    #[must_use]
    pub fn from_tasks(tasks: &[IndexTask]) -> Self {
        Self::new(tasks.iter().map(IndexTask::key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn counters(&self, key: &str) -> Option<Arc<IndexCounters>> {
        self.counters.get(key).cloned()
    }

    fn entry(&self, key: &str, operation: &'static str) -> Option<&IndexCounters> {
        let entry = self.counters.get(key).map(Arc::as_ref);
        if entry.is_none() {
            tracing::warn!(key, operation, "Ignoring counter update for unknown index key");
        }
        entry
    }

    /// Count one batch of `n` documents read. Returns `false` for an unknown key.
    pub fn add_read(&self, key: &str, n: u64) -> bool {
        self.entry(key, "add_read").is_some_and(|c| {
            c.read.fetch_add(n, Ordering::Relaxed);
            c.batches_read.fetch_add(1, Ordering::Relaxed);
            true
        })
    }

    /// Count one batch of `n` documents present at the destination.
    pub fn add_write(&self, key: &str, n: u64) -> bool {
        self.entry(key, "add_write").is_some_and(|c| {
            c.written.fetch_add(n, Ordering::Relaxed);
            c.batches_written.fetch_add(1, Ordering::Relaxed);
            true
        })
    }

    /// Count `n` documents that will never reach the destination.
    pub fn add_dropped(&self, key: &str, n: u64) -> bool {
        self.entry(key, "add_dropped").is_some_and(|c| {
            c.dropped.fetch_add(n, Ordering::Relaxed);
            true
        })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<CounterSnapshot> {
        self.counters.get(key).map(|c| c.snapshot())
    }

    /// Per-key values in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, CounterSnapshot)> {
        self.order
            .iter()
            .filter_map(|key| self.get(key).map(|snap| (key.clone(), snap)))
            .collect()
    }

    #[must_use]
    pub fn totals(&self) -> CounterSnapshot {
        self.snapshot()
            .into_iter()
            .fold(CounterSnapshot::default(), |acc, (_, snap)| acc + snap)
    }
}
