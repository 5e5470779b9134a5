//! Cross-cluster image stream synchronization for the gantry CI operator.
//!
//! A long-running controller that watches image streams on every registry
//! cluster, expands stream events into per-tag reconcile requests, and keeps
//! the tags identical across clusters with per-stream mutual exclusion and
//! last-writer-wins by image creation time.

pub mod error;
pub mod filter;
pub mod metrics;
pub mod reconciler;
pub mod sharded_lock;

pub use error::{SyncError, SyncResult};
pub use filter::{requests_for_stream, ReconcileRequest, StreamFilter};
pub use metrics::{SyncMetrics, METRICS};
pub use reconciler::{
    ClusterRegistry, PullSecretSource, RegistrySyncer, CONTROLLER_NAME, PULL_SECRET_NAME,
    RELEASE_CONFIG_ANNOTATION_PREFIX, REQUESTER_ANNOTATION, SYNC_FINALIZER,
};
pub use sharded_lock::{ShardedLock, StreamKey};
