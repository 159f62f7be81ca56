//! Counter sink for classified frames.
//!
//! The sink receives one increment per classified frame, keyed by category
//! and source endpoint. Increments are fire-and-forget: a sink never
//! surfaces failures to the worker.

use std::collections::HashMap;

use parking_lot::Mutex;
use tanglewatch_core::Category;

/// Receives per-endpoint per-category increment notifications.
pub trait CounterSink: Send + Sync + 'static {
    /// Record one classified frame. Fire-and-forget.
    fn increment(&self, category: Category, endpoint: &str);
}

/// Production sink: forwards increments to the metrics recorder.
#[derive(Debug, Default)]
pub struct MetricsSink;

impl CounterSink for MetricsSink {
    fn increment(&self, category: Category, endpoint: &str) {
        metrics::counter!(
            "feed_events_total",
            "category" => category.as_str(),
            "endpoint" => endpoint.to_string(),
        )
        .increment(1);
    }
}

/// In-memory sink used in tests and for diagnostics snapshots.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    counts: Mutex<HashMap<(Category, String), u64>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for one (category, endpoint) pair.
    pub fn get(&self, category: Category, endpoint: &str) -> u64 {
        self.counts
            .lock()
            .get(&(category, endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of all counts, for reporting.
    pub fn snapshot(&self) -> Vec<((Category, String), u64)> {
        let mut entries: Vec<_> = self
            .counts
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl CounterSink for MemoryCounters {
    fn increment(&self, category: Category, endpoint: &str) {
        let mut counts = self.counts.lock();
        *counts
            .entry((category, endpoint.to_string()))
            .or_default() += 1;
    }
}
