//! Error types for cluster API interactions.

use crate::objects::ObjectKey;

/// Errors returned by a [`crate::client::ClusterClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("conflict writing {kind} {key}")]
    Conflict { kind: &'static str, key: ObjectKey },

    #[error("image import for {key} did not succeed: reason: {reason}, message: {message}")]
    ImportFailed {
        key: ObjectKey,
        reason: String,
        message: String,
    },

    #[error("{0} failed")]
    WorkloadFailed(String),

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }
}

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
