//! Queued task aggregate and planner result types.

use super::{QueueName, TaskId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A task that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueTask {
    name: QueueName,
    priority: Option<i32>,
    data: Value,
    enqueued_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    expected_at: Option<DateTime<Utc>>,
}

impl NewQueueTask {
    /// Creates an immediately eligible task stamped with the clock time.
    #[must_use]
    pub fn new(name: QueueName, data: Value, clock: &impl Clock) -> Self {
        Self {
            name,
            priority: None,
            data,
            enqueued_at: clock.utc(),
            scheduled_at: None,
            expected_at: None,
        }
    }

    /// Sets the advisory priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the earliest time the task becomes eligible.
    #[must_use]
    pub const fn with_scheduled_at(mut self, scheduled_at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    /// Sets the advisory deadline.
    #[must_use]
    pub const fn with_expected_at(mut self, expected_at: Option<DateTime<Utc>>) -> Self {
        self.expected_at = expected_at;
        self
    }

    /// Returns the queue name.
    #[must_use]
    pub const fn name(&self) -> &QueueName {
        &self.name
    }

    /// Returns the advisory priority.
    #[must_use]
    pub const fn priority(&self) -> Option<i32> {
        self.priority
    }

    /// Returns the task data.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the enqueue timestamp.
    #[must_use]
    pub const fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Returns the earliest eligibility time, if any.
    #[must_use]
    pub const fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    /// Returns the advisory deadline, if any.
    #[must_use]
    pub const fn expected_at(&self) -> Option<DateTime<Utc>> {
        self.expected_at
    }

    /// Attaches a store-assigned id, producing an unclaimed task.
    #[must_use]
    pub fn into_task(self, id: TaskId) -> QueueTask {
        QueueTask {
            id,
            name: self.name,
            priority: self.priority,
            data: self.data,
            enqueued_at: self.enqueued_at,
            scheduled_at: self.scheduled_at,
            expected_at: self.expected_at,
            dequeued_at: None,
            finished_at: None,
        }
    }
}

/// Persisted unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    id: TaskId,
    name: QueueName,
    priority: Option<i32>,
    data: Value,
    enqueued_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    expected_at: Option<DateTime<Utc>>,
    dequeued_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Parameter object for reconstructing a persisted task.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedQueueTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted queue name.
    pub name: QueueName,
    /// Persisted advisory priority.
    pub priority: Option<i32>,
    /// Persisted payload.
    pub data: Value,
    /// Persisted enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
    /// Persisted eligibility timestamp.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Persisted advisory deadline.
    pub expected_at: Option<DateTime<Utc>>,
    /// Persisted claim timestamp.
    pub dequeued_at: Option<DateTime<Utc>>,
    /// Persisted completion timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueTask {
    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedQueueTaskData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            priority: data.priority,
            data: data.data,
            enqueued_at: data.enqueued_at,
            scheduled_at: data.scheduled_at,
            expected_at: data.expected_at,
            dequeued_at: data.dequeued_at,
            finished_at: data.finished_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the queue name.
    #[must_use]
    pub const fn name(&self) -> &QueueName {
        &self.name
    }

    /// Returns the advisory priority.
    #[must_use]
    pub const fn priority(&self) -> Option<i32> {
        self.priority
    }

    /// Returns the task data.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the enqueue timestamp.
    #[must_use]
    pub const fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Returns the earliest eligibility time, if any.
    #[must_use]
    pub const fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    /// Returns the advisory deadline, if any.
    #[must_use]
    pub const fn expected_at(&self) -> Option<DateTime<Utc>> {
        self.expected_at
    }

    /// Returns the claim timestamp, if claimed.
    #[must_use]
    pub const fn dequeued_at(&self) -> Option<DateTime<Utc>> {
        self.dequeued_at
    }

    /// Returns the completion timestamp, if finished.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns whether a worker may claim the task at `now`.
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.dequeued_at.is_none() && self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Returns whether the task has been finished.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Marks the task claimed at `now`.
    ///
    /// Returns `false` and leaves the task untouched when it was already
    /// claimed.
    pub fn claim(&mut self, now: DateTime<Utc>) -> bool {
        if self.dequeued_at.is_some() {
            return false;
        }
        self.dequeued_at = Some(now);
        true
    }

    /// Records completion.
    ///
    /// Sets `dequeued_at` first when the task was never claimed. The first
    /// completion wins: returns `false` without changes when already finished.
    pub fn finish(&mut self, clock: &impl Clock) -> bool {
        if self.finished_at.is_some() {
            return false;
        }
        let now = clock.utc();
        if self.dequeued_at.is_none() {
            self.dequeued_at = Some(now);
        }
        self.finished_at = Some(now);
        true
    }

    /// Applies a stored update from `incoming`.
    ///
    /// Priority is replaced; claim and completion timestamps that are already
    /// set are kept, so a stale snapshot cannot move them.
    pub fn merge_update(&mut self, incoming: &Self) {
        self.priority = incoming.priority;
        self.dequeued_at = self.dequeued_at.or(incoming.dequeued_at);
        self.finished_at = self.finished_at.or(incoming.finished_at);
    }

    /// Builds a fresh, unclaimed copy of this task.
    ///
    /// The copy keeps name, priority, data and scheduling hints; the enqueue
    /// timestamp comes from `clock` and claim/completion are unset.
    #[must_use]
    pub fn duplicate(&self, clock: &impl Clock) -> NewQueueTask {
        NewQueueTask::new(self.name.clone(), self.data.clone(), clock)
            .with_priority(self.priority)
            .with_scheduled_at(self.scheduled_at)
            .with_expected_at(self.expected_at)
    }

    /// Returns the ordering key the planner sorts candidates by.
    ///
    /// `None` sorts before any timestamp in both positions.
    #[must_use]
    pub const fn candidate_key(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.scheduled_at, self.expected_at)
    }
}

/// Task claimed by one planner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    /// Claimed task identifier.
    pub id: TaskId,
    /// Queue the task belongs to.
    pub name: QueueName,
    /// Advisory priority.
    pub priority: Option<i32>,
}

/// Result of one planner invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullOutcome {
    /// Task claimed by this invocation, if any.
    pub claimed: Option<ClaimedTask>,
    /// Time until the earliest not-yet-due candidate becomes due.
    pub next_wakeup: Option<Duration>,
}

impl PullOutcome {
    /// Outcome of a pass over an empty candidate set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            claimed: None,
            next_wakeup: None,
        }
    }

    /// Returns the claimed task id, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.claimed.as_ref().map(|claimed| claimed.id)
    }
}
