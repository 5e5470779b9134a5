//! Atomic counters for sync outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton for the syncer.
pub static METRICS: SyncMetrics = SyncMetrics::new();

/// Import outcome counters. Incremented at the call site, emitted as a
/// structured trace event per increment.
pub struct SyncMetrics {
    imports_succeeded: AtomicU64,
    imports_failed: AtomicU64,
}

impl SyncMetrics {
    pub const fn new() -> Self {
        Self {
            imports_succeeded: AtomicU64::new(0),
            imports_failed: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one import attempt on a cluster.
    pub fn count_import(&self, cluster: &str, namespace: &str, stream: &str, outcome: bool) {
        if outcome {
            self.imports_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.imports_failed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(
            metric = "import_result",
            cluster,
            namespace,
            stream,
            outcome,
            "counter incremented"
        );
    }

    pub fn imports_succeeded(&self) -> u64 {
        self.imports_succeeded.load(Ordering::Relaxed)
    }

    pub fn imports_failed(&self) -> u64 {
        self.imports_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.imports_succeeded.store(0, Ordering::Relaxed);
        self.imports_failed.store(0, Ordering::Relaxed);
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
