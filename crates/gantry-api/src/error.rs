//! Domain-level error taxonomy shared by the configuration model.

/// Errors produced by the configuration model and parameter store.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("no value or producer for parameter {name}")]
    ParameterUnavailable { name: String },

    #[error("parameter producer for {name} failed: {message}")]
    ParameterFailed { name: String, message: String },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    FileParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Result type for configuration-model operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
