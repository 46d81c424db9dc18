//! Deferred-call payload stored in a task's `data` column.

use super::{QueueDomainError, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a record of a target entity type.
pub type RecordId = i64;

/// Key-value context a deferred call executes with.
pub type ContextMap = Map<String, Value>;

/// Record reference(s) a deferred call targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Records {
    /// A single record.
    Single(RecordId),
    /// A list of records; empty for model-level calls.
    Many(Vec<RecordId>),
}

impl Records {
    /// Returns an empty record list (model-level call).
    #[must_use]
    pub const fn none() -> Self {
        Self::Many(Vec::new())
    }

    /// Returns every referenced id in order.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        match self {
            Self::Single(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

impl Default for Records {
    fn default() -> Self {
        Self::none()
    }
}

impl From<RecordId> for Records {
    fn from(value: RecordId) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<RecordId>> for Records {
    fn from(value: Vec<RecordId>) -> Self {
        Self::Many(value)
    }
}

impl From<&[RecordId]> for Records {
    fn from(value: &[RecordId]) -> Self {
        Self::Many(value.to_vec())
    }
}

impl<T> From<Option<T>> for Records
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Self::none, Into::into)
    }
}

/// Serialized method call carried by a queued task.
///
/// Field names are the persisted JSON keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Target entity type name.
    pub model: String,
    /// Method to invoke on the target.
    pub method: String,
    /// Identity the call executes as.
    pub user: UserId,
    /// Cleaned execution context.
    #[serde(default)]
    pub context: ContextMap,
    /// Normalized record reference(s).
    #[serde(default)]
    pub instances: Records,
    /// Positional arguments following the receiver.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: ContextMap,
    /// Whether the call and its completion share one unit of work.
    #[serde(default = "default_atomic")]
    pub atomic: bool,
}

const fn default_atomic() -> bool {
    true
}

impl TaskPayload {
    /// Encodes the payload as task data.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidPayload`] if serialization fails.
    pub fn to_value(&self) -> Result<Value, QueueDomainError> {
        serde_json::to_value(self).map_err(|err| QueueDomainError::InvalidPayload(err.to_string()))
    }

    /// Decodes a payload from task data.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidPayload`] when the data is not a
    /// call payload, or names an empty model or method.
    pub fn from_value(data: &Value) -> Result<Self, QueueDomainError> {
        let payload = Self::deserialize(data)
            .map_err(|err| QueueDomainError::InvalidPayload(err.to_string()))?;
        if payload.model.trim().is_empty() {
            return Err(QueueDomainError::EmptyModelName);
        }
        if payload.method.trim().is_empty() {
            return Err(QueueDomainError::EmptyMethodName);
        }
        Ok(payload)
    }

    /// Returns the execution context this payload runs under.
    #[must_use]
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::new(self.user, self.context.clone())
    }
}

/// Acting identity and context threaded explicitly into target handles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    user: Option<UserId>,
    context: ContextMap,
}

impl ExecutionContext {
    /// Creates a context acting as `user`.
    #[must_use]
    pub const fn new(user: UserId, context: ContextMap) -> Self {
        Self {
            user: Some(user),
            context,
        }
    }

    /// Returns the acting user, [`UserId::ROOT`] when unset.
    #[must_use]
    pub fn user(&self) -> UserId {
        self.user.unwrap_or(UserId::ROOT)
    }

    /// Returns the context map.
    #[must_use]
    pub const fn context(&self) -> &ContextMap {
        &self.context
    }

    /// Looks up one context value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}
