//! Identifier and validated scalar types for the queue domain.

use super::QueueDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    /// Wraps a raw store identifier.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity a deferred call executes as.
///
/// Defaults to [`UserId::ROOT`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Superuser identity used for queue bookkeeping.
    pub const ROOT: Self = Self(0);

    /// Wraps a raw user identifier.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical queue (channel) name used to partition consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Width of the persisted `name` column.
    pub const MAX_LEN: usize = 255;

    /// Name used when a caller does not pick a queue.
    pub const DEFAULT: &'static str = "default";

    /// Creates a validated queue name.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::EmptyQueueName`] when the trimmed value is
    /// empty or [`QueueDomainError::QueueNameTooLong`] when it exceeds
    /// [`Self::MAX_LEN`] characters.
    pub fn new(value: impl Into<String>) -> Result<Self, QueueDomainError> {
        let raw = value.into();
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Err(QueueDomainError::EmptyQueueName);
        }
        if normalized.chars().count() > Self::MAX_LEN {
            return Err(QueueDomainError::QueueNameTooLong(raw));
        }
        Ok(Self(normalized.to_owned()))
    }

    /// Returns the `default` queue name.
    #[must_use]
    pub fn default_queue() -> Self {
        Self(Self::DEFAULT.to_owned())
    }

    /// Returns the queue name as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self::default_queue()
    }
}

impl TryFrom<String> for QueueName {
    type Error = QueueDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
