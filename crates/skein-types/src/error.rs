//! Error types for skein.
//!
//! [`SkeinError`] is the shared error type of the core crates. Tool,
//! model and service failures have their own enums closer to where they
//! are produced.

use thiserror::Error;

use crate::event::Topic;

/// Top-level error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SkeinError {
    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
    },

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The bus rejected a publish (closed).
    #[error("bus error: {0}")]
    Bus(String),

    /// A channel adapter failed to deliver an outbound event.
    #[error("channel error: {0}")]
    Channel(String),

    /// A session could not be read or written.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// A security boundary was violated (path traversal, oversized input, etc.)
    #[error("security violation: {reason}")]
    SecurityViolation {
        /// What policy was violated.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single subscriber's handler failed while an event was delivered.
///
/// Never returned to the publisher; the bus logs it and counts it.
#[derive(Error, Debug, Clone)]
#[error("delivery of {topic} event {event_id} to subscription {subscription} failed: {reason}")]
pub struct DeliveryError {
    /// Subscription whose handler failed.
    pub subscription: u64,
    /// Topic of the event.
    pub topic: Topic,
    /// Id of the event.
    pub event_id: String,
    /// Handler error or panic message.
    pub reason: String,
}

/// Convenience alias used throughout the crates.
pub type Result<T> = std::result::Result<T, SkeinError>;
