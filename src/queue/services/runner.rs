//! Executes claimed tasks against resolved target handles.

use crate::queue::{
    domain::{
        ExecutionContext, QueueDomainError, QueueTask, RecordId, Records, TaskId, TaskPayload,
    },
    ports::{
        CallTarget, Invocation, ModelError, ModelHandle, ModelResolver, QueueStore,
        QueueStoreError, QueueTransaction, ResolveError,
    },
};
use mockable::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum number of ids checked per existence lookup.
pub const ID_LOOKUP_CHUNK: usize = 1000;

/// What happened when a task ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The method was invoked.
    Executed,
    /// The single target record no longer exists; nothing was invoked.
    Skipped,
}

/// Errors returned while running a task.
#[derive(Debug, Error)]
pub enum RunError {
    /// The task data is not a call payload.
    #[error(transparent)]
    Payload(#[from] QueueDomainError),
    /// The model or method is no longer registered.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The invoked operation or the id lookup failed.
    #[error(transparent)]
    Execution(#[from] ModelError),
    /// Reading or finishing the task failed.
    #[error(transparent)]
    Store(#[from] QueueStoreError),
}

/// Result type for runner operations.
pub type RunResult<T> = Result<T, RunError>;

/// Runs deferred calls and records their completion.
///
/// A failing call leaves its task dequeued but unfinished; nothing is
/// retried.
pub struct QueueRunner<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    resolver: Arc<dyn ModelResolver>,
}

impl<S, C> Clone for QueueRunner<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<S, C> QueueRunner<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    /// Creates a runner.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>, resolver: Arc<dyn ModelResolver>) -> Self {
        Self {
            store,
            clock,
            resolver,
        }
    }

    /// Runs `task` in atomic mode.
    ///
    /// The completion is staged in a store unit of work before the call and
    /// committed once the call returns; a failing call rolls it back. When
    /// the completion cannot be staged the call does not run. Backends with
    /// row locks keep the task row locked for the duration of the call.
    ///
    /// The target's own side effects are not part of the unit: if the
    /// commit fails after a successful call, those effects stand and the
    /// task stays unfinished.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the payload cannot be decoded or resolved,
    /// the call fails, or the completion cannot be staged or committed.
    pub async fn run(&self, task: &QueueTask) -> RunResult<RunOutcome> {
        let mut unit = self.store.begin().await?;
        let mut completed = task.clone();
        let staged = if completed.finish(&*self.clock) {
            unit.update(&completed).await
        } else {
            Ok(())
        };
        if let Err(err) = staged {
            abandon(unit).await;
            return Err(err.into());
        }
        match self.execute(task).await {
            Ok(outcome) => {
                unit.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                abandon(unit).await;
                Err(err)
            }
        }
    }

    /// Runs task `id` in non-atomic mode.
    ///
    /// The call runs outside any unit of work. The completion is written
    /// afterwards from a fresh read, so it does not overwrite changes the
    /// call made to the row; if that write fails the call's effects stand.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when the task disappears, and
    /// otherwise the same errors as [`Self::run`].
    pub async fn run_non_atomic(&self, id: TaskId) -> RunResult<RunOutcome> {
        let task = self.load(id).await?;
        let outcome = self.execute(&task).await?;
        let latest = self.load(id).await?;
        self.finish(latest).await?;
        Ok(outcome)
    }

    /// Runs claimed task `id` in the mode its payload selects.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::NotFound`] when the task is missing, and
    /// otherwise the errors of [`Self::run`] or [`Self::run_non_atomic`].
    pub async fn run_claimed(&self, id: TaskId) -> RunResult<RunOutcome> {
        let task = self.load(id).await?;
        let atomic = TaskPayload::from_value(task.data()).map_or(true, |payload| payload.atomic);
        if atomic {
            self.run(&task).await
        } else {
            self.run_non_atomic(id).await
        }
    }

    async fn load(&self, id: TaskId) -> RunResult<QueueTask> {
        Ok(self
            .store
            .find_by_id(id)
            .await?
            .ok_or(QueueStoreError::NotFound(id))?)
    }

    async fn finish(&self, mut task: QueueTask) -> RunResult<()> {
        if task.finish(&*self.clock) {
            self.store.update(&task).await?;
        }
        Ok(())
    }

    async fn execute(&self, task: &QueueTask) -> RunResult<RunOutcome> {
        let payload = TaskPayload::from_value(task.data())?;
        let handle = self.resolver.resolve(&payload.model, &payload.method)?;
        let context = payload.execution_context();

        let Some(target) = surviving_target(handle.as_ref(), &payload.instances, &context).await?
        else {
            debug!(
                task_id = %task.id(),
                model = %payload.model,
                method = %payload.method,
                "target record is gone, skipping call"
            );
            return Ok(RunOutcome::Skipped);
        };

        let TaskPayload {
            method,
            args,
            kwargs,
            ..
        } = payload;
        handle
            .invoke(Invocation {
                method,
                target,
                args,
                kwargs,
                context,
            })
            .await?;
        Ok(RunOutcome::Executed)
    }
}

async fn abandon(unit: Box<dyn QueueTransaction>) {
    if let Err(err) = unit.rollback().await {
        warn!(error = %err, "failed to roll back task completion");
    }
}

/// Re-checks the stored records, inactive ones included.
///
/// Returns `None` when a single target vanished. Missing members of a
/// collection are dropped in order; an empty result becomes a model-level
/// call.
async fn surviving_target(
    handle: &dyn ModelHandle,
    records: &Records,
    context: &ExecutionContext,
) -> Result<Option<CallTarget>, ModelError> {
    match records {
        Records::Single(id) => {
            let existing = existing_ids(handle, &[*id], context).await?;
            Ok(existing.contains(id).then_some(CallTarget::Record(*id)))
        }
        Records::Many(ids) if ids.is_empty() => Ok(Some(CallTarget::Model)),
        Records::Many(ids) => {
            let existing = existing_ids(handle, ids, context).await?;
            let survivors: Vec<RecordId> = ids
                .iter()
                .copied()
                .filter(|id| existing.contains(id))
                .collect();
            if survivors.is_empty() {
                Ok(Some(CallTarget::Model))
            } else {
                Ok(Some(CallTarget::Records(survivors)))
            }
        }
    }
}

async fn existing_ids(
    handle: &dyn ModelHandle,
    ids: &[RecordId],
    context: &ExecutionContext,
) -> Result<HashSet<RecordId>, ModelError> {
    let mut existing = HashSet::with_capacity(ids.len());
    for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
        existing.extend(handle.existing_ids(chunk, context).await?);
    }
    Ok(existing)
}
