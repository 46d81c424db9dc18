//! Target entity resolver port.
//!
//! Workers never look target types up through global state: a resolver is
//! built once at start-up and handed to the caller proxy and the runner.

use crate::queue::domain::{ContextMap, ExecutionContext, RecordId};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Result type for target handle operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Record reference prepended to a deferred call's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Model-level call without a record receiver.
    Model,
    /// One surviving record.
    Record(RecordId),
    /// Surviving records, in enqueue order.
    Records(Vec<RecordId>),
}

/// A fully resolved call handed to a target handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Allow-listed method name.
    pub method: String,
    /// Receiver prepended to `args`.
    pub target: CallTarget,
    /// Stored positional arguments.
    pub args: Vec<Value>,
    /// Stored keyword arguments.
    pub kwargs: ContextMap,
    /// Acting identity and context.
    pub context: ExecutionContext,
}

/// Invocable handle for one target entity type.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Returns the subset of `ids` that still exist, inactive records
    /// included.
    async fn existing_ids(
        &self,
        ids: &[RecordId],
        context: &ExecutionContext,
    ) -> ModelResult<Vec<RecordId>>;

    /// Executes a deferred call.
    async fn invoke(&self, invocation: Invocation) -> ModelResult<()>;
}

/// Maps a type name and method to an invocable handle.
pub trait ModelResolver: Send + Sync {
    /// Resolves `model` and checks `method` against its allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownModel`] for unregistered types and
    /// [`ResolveError::MethodNotAllowed`] for methods outside the allow-list.
    fn resolve(&self, model: &str, method: &str) -> Result<Arc<dyn ModelHandle>, ResolveError>;
}

/// Errors returned while resolving a target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// No handle is registered for the type name.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The method is not on the type's allow-list.
    #[error("method '{method}' is not allowed on model '{model}'")]
    MethodNotAllowed {
        /// Target type name.
        model: String,
        /// Rejected method name.
        method: String,
    },
}

/// Errors raised by target handles.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Record existence lookup failed.
    #[error("record lookup failed: {0}")]
    Lookup(Arc<dyn std::error::Error + Send + Sync>),

    /// The invoked operation failed.
    #[error("invocation failed: {0}")]
    Invocation(Arc<dyn std::error::Error + Send + Sync>),
}

impl ModelError {
    /// Wraps a lookup error.
    pub fn lookup(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Lookup(Arc::new(err))
    }

    /// Wraps an invocation error.
    pub fn invocation(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Invocation(Arc::new(err))
    }
}
