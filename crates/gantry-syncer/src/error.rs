//! Error types for the registry syncer.

use gantry_cluster::ClusterError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("malformed request name {name}: expected <stream>:<tag>")]
    MalformedRequest { name: String },

    #[error("no registry configured for cluster {0}")]
    UnknownCluster(String),

    #[error("timed out waiting for imagestream {key} to appear in the cache on cluster {cluster}")]
    CacheTimeout {
        cluster: String,
        key: gantry_cluster::ObjectKey,
    },

    #[error("import on cluster {cluster} failed: {source}")]
    ImportFailed {
        cluster: String,
        #[source]
        source: ClusterError,
    },

    #[error("reconciliation interrupted")]
    Terminal,

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl SyncError {
    /// Terminal errors must not be rescheduled by the worker loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Terminal)
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
