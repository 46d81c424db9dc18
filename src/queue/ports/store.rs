//! Store port for durable task rows and the dequeue planner.

use crate::queue::domain::{NewQueueTask, PullOutcome, QueueName, QueueTask, TaskId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for queue store operations.
pub type QueueStoreResult<T> = Result<T, QueueStoreError>;

/// Task persistence and claiming contract.
///
/// Implementations are the single source of truth shared by every producer
/// and worker; they must not cache rows in process memory.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Stores a new task and returns its assigned identifier.
    ///
    /// Backends with a notification channel also publish a push
    /// notification carrying the queue name.
    async fn insert(&self, task: &NewQueueTask) -> QueueStoreResult<TaskId>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> QueueStoreResult<Option<QueueTask>>;

    /// Persists the mutable fields of an existing task.
    ///
    /// Claim and completion timestamps already stored are kept: the first
    /// write wins even when `task` is a stale snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when the task does not exist.
    async fn update(&self, task: &QueueTask) -> QueueStoreResult<()>;

    /// Atomically claims at most one due task.
    ///
    /// `name` restricts the scan to one queue; `None` scans every queue. The
    /// returned wake-up hint is computed whether or not a task was claimed.
    async fn pull(&self, name: Option<&QueueName>) -> QueueStoreResult<PullOutcome>;

    /// Starts a unit of work whose staged writes become visible together.
    async fn begin(&self) -> QueueStoreResult<Box<dyn QueueTransaction>>;
}

/// Open unit of work on a queue store.
///
/// Writes staged through it are published by [`commit`](Self::commit) and
/// discarded by [`rollback`](Self::rollback). Dropping an open unit discards
/// its writes.
#[async_trait]
pub trait QueueTransaction: Send {
    /// Stages an update with the semantics of [`QueueStore::update`].
    ///
    /// Backends with row locks hold the task row until the unit ends.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when the task does not exist.
    async fn update(&mut self, task: &QueueTask) -> QueueStoreResult<()>;

    /// Publishes every staged write.
    async fn commit(self: Box<Self>) -> QueueStoreResult<()>;

    /// Discards every staged write.
    async fn rollback(self: Box<Self>) -> QueueStoreResult<()>;
}

/// Errors returned by queue store implementations.
#[derive(Debug, Clone, Error)]
pub enum QueueStoreError {
    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl QueueStoreError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
