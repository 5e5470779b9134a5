//! Per-stream mutual exclusion with bounded memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

/// Key of an image stream across clusters. Cluster identity is intentionally
/// excluded: contention between clusters on the same stream is accepted in
/// exchange for simpler code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub namespace: String,
    pub name: String,
}

impl StreamKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A key-indexed mutex pool. Locks are created on first use and removed by
/// the periodic cleanup so the map does not grow without bound.
#[derive(Default)]
pub struct ShardedLock {
    locks: Mutex<HashMap<StreamKey, Arc<Mutex<()>>>>,
}

impl ShardedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the mutex for `key`. The map-level lock is held only
    /// for the lookup; callers lock the returned mutex themselves.
    pub async fn get_lock(&self, key: &StreamKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Delete all locks, acquiring first the map lock and then each
    /// individual lock before deleting it. The individual lock must be
    /// acquired: it may be held, and deleting it while held would let a
    /// recreated lock be acquired in parallel for the same stream. While
    /// this runs no new reconcile can start, as the map lock is held.
    pub async fn cleanup(&self) {
        let mut locks = self.locks.lock().await;
        let keys: Vec<StreamKey> = locks.keys().cloned().collect();
        for key in keys {
            if let Some(lock) = locks.get(&key).cloned() {
                let guard = lock.lock().await;
                locks.remove(&key);
                drop(guard);
            }
        }
    }

    /// Run [`cleanup`](Self::cleanup) on a fixed period until the task is
    /// dropped or aborted.
    pub fn spawn_cleaner(self: Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                debug!("starting to clean up imagestream locks");
                let started = std::time::Instant::now();
                self.cleanup().await;
                debug!(duration = ?started.elapsed(), "finished cleaning up imagestream locks");
            }
        })
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
