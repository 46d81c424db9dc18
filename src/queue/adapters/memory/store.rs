//! In-memory queue store for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use super::InMemoryQueueListener;
use crate::queue::{
    domain::{ClaimedTask, NewQueueTask, PullOutcome, QueueName, QueueTask, TaskId},
    ports::{QueueStore, QueueStoreError, QueueStoreResult, QueueTransaction},
};

/// Default size of the planner's candidate window.
pub const DEFAULT_CANDIDATE_LIMIT: usize = 1000;

/// Thread-safe in-memory queue store.
///
/// The state lock plays the role of the row lock: a pull holds it for the
/// whole scan-and-claim, so concurrent pulls never claim the same task.
#[derive(Debug)]
pub struct InMemoryQueueStore<C> {
    state: Arc<RwLock<InMemoryQueueState>>,
    clock: Arc<C>,
    candidate_limit: usize,
    pushes: Arc<watch::Sender<u64>>,
}

impl<C> Clone for InMemoryQueueStore<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            candidate_limit: self.candidate_limit,
            pushes: Arc::clone(&self.pushes),
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    tasks: BTreeMap<TaskId, QueueTask>,
    last_id: i64,
}

impl<C> InMemoryQueueStore<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        let (pushes, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(InMemoryQueueState::default())),
            clock,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            pushes: Arc::new(pushes),
        }
    }

    /// Overrides the planner's candidate window.
    #[must_use]
    pub const fn with_candidate_limit(mut self, candidate_limit: usize) -> Self {
        self.candidate_limit = candidate_limit;
        self
    }

    /// Returns a listener woken by every subsequent insert.
    #[must_use]
    pub fn listener(&self) -> InMemoryQueueListener {
        InMemoryQueueListener::new(self.pushes.subscribe())
    }

    /// Removes a task row, as an external retention job would.
    ///
    /// Returns the removed task, if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::Persistence`] when the state lock is
    /// poisoned.
    pub fn remove(&self, id: TaskId) -> QueueStoreResult<Option<QueueTask>> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.tasks.remove(&id))
    }
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> QueueStoreError {
    QueueStoreError::persistence(std::io::Error::other(err.to_string()))
}

/// Runs the planner over `tasks`, returning the winner's id and wake-up hint.
fn plan(
    tasks: &BTreeMap<TaskId, QueueTask>,
    name: Option<&QueueName>,
    candidate_limit: usize,
    now: DateTime<Utc>,
) -> (Option<TaskId>, Option<std::time::Duration>) {
    let mut candidates: Vec<&QueueTask> = tasks
        .values()
        .filter(|task| task.dequeued_at().is_none())
        .filter(|task| name.is_none_or(|wanted| task.name() == wanted))
        .collect();
    // Stable sort keeps id order among equal keys; `None` sorts first.
    candidates.sort_by_key(|task| task.candidate_key());
    candidates.truncate(candidate_limit);

    let selected = candidates
        .iter()
        .find(|task| task.is_claimable_at(now))
        .map(|task| task.id());

    let next_wakeup = candidates
        .iter()
        .filter_map(|task| task.scheduled_at())
        .filter(|scheduled_at| *scheduled_at >= now)
        .map(|scheduled_at| scheduled_at - now)
        .min()
        .and_then(|delta| delta.to_std().ok());

    (selected, next_wakeup)
}

#[async_trait]
impl<C> QueueStore for InMemoryQueueStore<C>
where
    C: Clock + Send + Sync,
{
    async fn insert(&self, task: &NewQueueTask) -> QueueStoreResult<TaskId> {
        let id = {
            let mut state = self.state.write().map_err(poisoned)?;
            state.last_id += 1;
            let id = TaskId::new(state.last_id);
            state.tasks.insert(id, task.clone().into_task(id));
            id
        };
        self.pushes.send_modify(|count| *count = count.wrapping_add(1));
        Ok(id)
    }

    async fn find_by_id(&self, id: TaskId) -> QueueStoreResult<Option<QueueTask>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn update(&self, task: &QueueTask) -> QueueStoreResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        apply_update(&mut state, task)
    }

    async fn pull(&self, name: Option<&QueueName>) -> QueueStoreResult<PullOutcome> {
        let now = self.clock.utc();
        let mut state = self.state.write().map_err(poisoned)?;
        let (selected, next_wakeup) = plan(&state.tasks, name, self.candidate_limit, now);

        let mut claimed = None;
        if let Some(task) = selected.and_then(|id| state.tasks.get_mut(&id)) {
            if task.claim(now) {
                claimed = Some(ClaimedTask {
                    id: task.id(),
                    name: task.name().clone(),
                    priority: task.priority(),
                });
            }
        }

        Ok(PullOutcome {
            claimed,
            next_wakeup,
        })
    }

    async fn begin(&self) -> QueueStoreResult<Box<dyn QueueTransaction>> {
        Ok(Box::new(InMemoryQueueTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }
}

fn apply_update(state: &mut InMemoryQueueState, task: &QueueTask) -> QueueStoreResult<()> {
    let stored = state
        .tasks
        .get_mut(&task.id())
        .ok_or(QueueStoreError::NotFound(task.id()))?;
    stored.merge_update(task);
    Ok(())
}

/// Unit of work buffering updates until commit.
///
/// Rows are not locked; commit applies the buffered updates under one write
/// guard.
#[derive(Debug)]
struct InMemoryQueueTransaction {
    state: Arc<RwLock<InMemoryQueueState>>,
    staged: Vec<QueueTask>,
}

#[async_trait]
impl QueueTransaction for InMemoryQueueTransaction {
    async fn update(&mut self, task: &QueueTask) -> QueueStoreResult<()> {
        let state = self.state.read().map_err(poisoned)?;
        if !state.tasks.contains_key(&task.id()) {
            return Err(QueueStoreError::NotFound(task.id()));
        }
        drop(state);
        self.staged.push(task.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> QueueStoreResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if let Some(gone) = self
            .staged
            .iter()
            .find(|task| !state.tasks.contains_key(&task.id()))
        {
            return Err(QueueStoreError::NotFound(gone.id()));
        }
        for task in &self.staged {
            apply_update(&mut state, task)?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> QueueStoreResult<()> {
        Ok(())
    }
}
