//! Model error types.
//!
//! All model operations return [`Result<T>`] which uses [`ModelError`]
//! as the error type.

use thiserror::Error;

/// Errors from the model interface.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ModelError {
    /// The backing service could not be reached or returned a server error.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within its deadline.
    #[error("model call timed out")]
    Timeout,

    /// The provider is throttling requests (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Credentials were rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The model is not configured (e.g. missing API key).
    #[error("model not configured: {0}")]
    NotConfigured(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider rejected the request.
    #[error("request failed: {0}")]
    Request(String),
}

impl ModelError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Unavailable(_) | ModelError::Timeout | ModelError::RateLimited { .. }
        )
    }
}

/// A convenience type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
