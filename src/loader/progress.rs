//! Loaded-item counters shared between concurrent fetches.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Monotonic counters for progress reporting.
#[derive(Debug, Default)]
pub struct LoadProgress {
    per_dataset: Vec<AtomicU64>,
    total: AtomicU64,
    windows_planned: AtomicUsize,
    windows_done: AtomicUsize,
}

impl LoadProgress {
    pub fn new(dataset_count: usize) -> Self {
        Self {
            per_dataset: (0..dataset_count).map(|_| AtomicU64::new(0)).collect(),
            ..Default::default()
        }
    }

    /// Add loaded items for a dataset. Returns `(dataset total, overall total)`.
    pub fn record_items(&self, dataset_index: usize, count: u64) -> (u64, u64) {
        let dataset_total = self
            .per_dataset
            .get(dataset_index)
            .map(|c| c.fetch_add(count, Ordering::Relaxed) + count)
            .unwrap_or(0);
        let total = self.total.fetch_add(count, Ordering::Relaxed) + count;
        (dataset_total, total)
    }

    pub fn set_planned(&self, windows: usize) {
        self.windows_planned.store(windows, Ordering::Relaxed);
    }

    pub fn window_done(&self) -> usize {
        self.windows_done.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_items(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn dataset_items(&self, dataset_index: usize) -> u64 {
        self.per_dataset
            .get(dataset_index)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn windows_planned(&self) -> usize {
        self.windows_planned.load(Ordering::Relaxed)
    }

    pub fn windows_done(&self) -> usize {
        self.windows_done.load(Ordering::Relaxed)
    }
}
