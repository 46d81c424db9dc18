//! Error types for queue domain validation and payload decoding.

use thiserror::Error;

/// Errors returned while constructing or decoding queue domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueDomainError {
    /// The queue name is empty after trimming.
    #[error("queue name must not be empty")]
    EmptyQueueName,

    /// The queue name exceeds the persisted column width.
    #[error("queue name '{0}' exceeds {max} characters", max = super::QueueName::MAX_LEN)]
    QueueNameTooLong(String),

    /// The model name is empty after trimming.
    #[error("model name must not be empty")]
    EmptyModelName,

    /// The method name is empty after trimming.
    #[error("method name must not be empty")]
    EmptyMethodName,

    /// The task data is not a decodable call payload.
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    /// A queue-control context value has the wrong shape.
    #[error("invalid value for context key '{key}': {reason}")]
    InvalidContextValue {
        /// Context key that carried the value.
        key: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}
