//! Queue operations shared by producers, workers and operators.

use crate::queue::{
    domain::{NewQueueTask, PullOutcome, QueueDomainError, QueueName, QueueTask, TaskId},
    ports::{QueueStore, QueueStoreError},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Optional scheduling hints for a pushed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Earliest time the task may be claimed.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Advisory deadline.
    pub expected_at: Option<DateTime<Utc>>,
    /// Advisory priority.
    pub priority: Option<i32>,
}

impl PushOptions {
    /// Sets the earliest claim time.
    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Sets the advisory deadline.
    #[must_use]
    pub const fn expected_at(mut self, at: DateTime<Utc>) -> Self {
        self.expected_at = Some(at);
        self
    }

    /// Sets the advisory priority.
    #[must_use]
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Service-level errors for queue operations.
#[derive(Debug, Error)]
pub enum QueueServiceError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] QueueDomainError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] QueueStoreError),
}

/// Result type for queue service operations.
pub type QueueServiceResult<T> = Result<T, QueueServiceError>;

/// Entry point for enqueueing, claiming and copying tasks.
pub struct QueueService<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> Clone for QueueService<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S, C> QueueService<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    /// Creates a queue service.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Returns the backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the service clock.
    #[must_use]
    pub const fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// Stores a new task on queue `name` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Store`] when the insert fails.
    pub async fn push(
        &self,
        name: QueueName,
        data: Value,
        options: PushOptions,
    ) -> QueueServiceResult<TaskId> {
        let task = NewQueueTask::new(name, data, &*self.clock)
            .with_priority(options.priority)
            .with_scheduled_at(options.scheduled_at)
            .with_expected_at(options.expected_at);
        Ok(self.store.insert(&task).await?)
    }

    /// Claims at most one due task, optionally restricted to one queue.
    ///
    /// An empty queue is a normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Store`] when the planner query fails.
    pub async fn pull(&self, name: Option<&QueueName>) -> QueueServiceResult<PullOutcome> {
        Ok(self.store.pull(name).await?)
    }

    /// Finds a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueServiceError::Store`] when the lookup fails.
    pub async fn find(&self, id: TaskId) -> QueueServiceResult<Option<QueueTask>> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// Marks task `id` finished without running it and returns the stored
    /// task.
    ///
    /// An already finished task keeps its first completion time.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when the task is missing.
    pub async fn finish(&self, id: TaskId) -> QueueServiceResult<QueueTask> {
        let mut task = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(QueueStoreError::NotFound(id))?;
        if task.finish(&*self.clock) {
            self.store.update(&task).await?;
        }
        Ok(task)
    }

    /// Re-enqueues fresh copies of `ids`, returning the new ids in order.
    ///
    /// Copies keep name, priority, data and scheduling hints; claim and
    /// completion timestamps start unset.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when a source task is missing.
    pub async fn copy(&self, ids: &[TaskId]) -> QueueServiceResult<Vec<TaskId>> {
        let mut copies = Vec::with_capacity(ids.len());
        for id in ids {
            let source = self
                .store
                .find_by_id(*id)
                .await?
                .ok_or(QueueStoreError::NotFound(*id))?;
            let copy = source.duplicate(&*self.clock);
            copies.push(self.store.insert(&copy).await?);
        }
        Ok(copies)
    }
}
