//! Service error types.

use thiserror::Error;

use skein_types::error::SkeinError;

/// Errors produced by services in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    /// A cron expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// The requested job was not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A job with the given name already exists.
    #[error("duplicate job name: {0}")]
    DuplicateJobName(String),

    /// A job field is empty or otherwise unusable.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The bus refused a synthetic event.
    #[error("bus error: {0}")]
    Bus(#[from] SkeinError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
