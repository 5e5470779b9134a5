//! Error taxonomy for planning and executing the step graph.

use gantry_api::ApiError;
use gantry_cluster::ClusterError;

/// Errors produced while planning or running steps.
///
/// Step failures carry a machine-readable `reason` tag so callers can
/// aggregate outcomes by failure class.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("[{reason}] {message}")]
    Reasoned { reason: &'static str, message: String },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("steps {0:?} can never be scheduled: unmet requirements")]
    Unschedulable(Vec<String>),

    #[error("step {step} failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("execution interrupted")]
    Interrupted,

    #[error("lease error: {0}")]
    Lease(String),

    #[error("release endpoint error: {0}")]
    ReleaseEndpoint(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Tag an error with a failure-class reason, e.g. `resolving_release`.
    pub fn for_reason(reason: &'static str, err: impl std::fmt::Display) -> Self {
        EngineError::Reasoned {
            reason,
            message: err.to_string(),
        }
    }

    /// Attribute an error to a named step.
    pub fn in_step(step: impl Into<String>, err: EngineError) -> Self {
        EngineError::StepFailed {
            step: step.into(),
            source: Box::new(err),
        }
    }
}

/// Result type for planner and executor operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
