//! `PostgreSQL` queue store and dequeue planner.

use super::{
    models::{LockedCandidateRow, NewQueueTaskRow, NextWakeupRow, PullRow, QueueTaskRow},
    schema::queue_tasks,
};
use crate::queue::{
    domain::{
        ClaimedTask, NewQueueTask, PersistedQueueTaskData, PullOutcome, QueueName, QueueTask,
        TaskId,
    },
    ports::{QueueStore, QueueStoreError, QueueStoreResult, QueueTransaction},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz, Varchar};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// `PostgreSQL` connection pool type used by queue adapters.
pub type QueuePgPool = Pool<ConnectionManager<PgConnection>>;

type QueuePgConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Default notification channel, named after the task table.
pub const DEFAULT_CHANNEL: &str = "queue_tasks";

/// Default size of the planner's candidate window.
pub const DEFAULT_CANDIDATE_LIMIT: i64 = 1000;

/// Optional backend features the store may rely on.
///
/// Turning a capability off selects the fallback path: select-then-update
/// claims, or pure polling without push notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Atomic update-with-return (`UPDATE ... RETURNING`).
    #[serde(default = "enabled")]
    pub returning: bool,
    /// Publish/subscribe channel (`LISTEN`/`NOTIFY`).
    #[serde(default = "enabled")]
    pub notifications: bool,
}

const fn enabled() -> bool {
    true
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            returning: true,
            notifications: true,
        }
    }
}

macro_rules! candidates_cte {
    () => {
        concat!(
            "WITH candidates AS (",
            "SELECT id, scheduled_at, expected_at FROM queue_tasks ",
            "WHERE ($1::VARCHAR IS NULL OR name = $1) AND dequeued_at IS NULL ",
            "ORDER BY scheduled_at ASC NULLS FIRST, expected_at ASC NULLS FIRST, id ",
            "LIMIT $2) "
        )
    };
}

macro_rules! lock_due_candidate {
    () => {
        concat!(
            "SELECT id, name, priority FROM queue_tasks ",
            "WHERE id IN (SELECT id FROM candidates) ",
            "AND dequeued_at IS NULL ",
            "AND (scheduled_at IS NULL OR scheduled_at <= CURRENT_TIMESTAMP) ",
            "ORDER BY scheduled_at ASC NULLS FIRST, expected_at ASC NULLS FIRST, id ",
            "LIMIT 1 FOR UPDATE SKIP LOCKED"
        )
    };
}

macro_rules! next_wakeup_seconds {
    () => {
        concat!(
            "SELECT MIN(EXTRACT(EPOCH FROM (scheduled_at - CURRENT_TIMESTAMP)))::DOUBLE PRECISION ",
            "AS seconds FROM candidates WHERE scheduled_at >= CURRENT_TIMESTAMP"
        )
    };
}

/// Claims and reports the wake-up hint in one statement.
///
/// `next_timeout` is an aggregate and always yields one row, so the left join
/// returns the hint even when `claimed` is empty.
const PULL_RETURNING_SQL: &str = concat!(
    candidates_cte!(),
    ", selected AS (",
    lock_due_candidate!(),
    "), next_timeout AS (",
    next_wakeup_seconds!(),
    "), claimed AS (",
    "UPDATE queue_tasks SET dequeued_at = CURRENT_TIMESTAMP FROM selected ",
    "WHERE queue_tasks.id = selected.id ",
    "RETURNING queue_tasks.id, queue_tasks.name, queue_tasks.priority) ",
    "SELECT claimed.id, claimed.name, claimed.priority, next_timeout.seconds ",
    "FROM next_timeout LEFT JOIN claimed ON TRUE"
);

const LOCK_CANDIDATE_SQL: &str = concat!(candidates_cte!(), lock_due_candidate!());

const NEXT_WAKEUP_SQL: &str = concat!(candidates_cte!(), next_wakeup_seconds!());

const CLAIM_LOCKED_SQL: &str = concat!(
    "UPDATE queue_tasks SET dequeued_at = CURRENT_TIMESTAMP ",
    "WHERE id = $1 AND dequeued_at IS NULL"
);

/// First write wins on both timestamps.
const UPDATE_TASK_SQL: &str = concat!(
    "UPDATE queue_tasks SET priority = $2, ",
    "dequeued_at = COALESCE(dequeued_at, $3), ",
    "finished_at = COALESCE(finished_at, $4) ",
    "WHERE id = $1"
);

/// `PostgreSQL`-backed queue store.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: QueuePgPool,
    capabilities: BackendCapabilities,
    candidate_limit: i64,
    channel: String,
}

impl PostgresQueueStore {
    /// Creates a store with every capability enabled.
    #[must_use]
    pub fn new(pool: QueuePgPool) -> Self {
        Self {
            pool,
            capabilities: BackendCapabilities::default(),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            channel: DEFAULT_CHANNEL.to_owned(),
        }
    }

    /// Overrides the backend capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Overrides the planner's candidate window.
    #[must_use]
    pub const fn with_candidate_limit(mut self, candidate_limit: i64) -> Self {
        self.candidate_limit = candidate_limit;
        self
    }

    /// Overrides the notification channel name.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Returns the configured capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    /// Returns the notification channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &QueuePgPool {
        &self.pool
    }

    /// Creates the task table and candidate index when missing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueStoreError::Persistence`] when the DDL fails.
    pub async fn install_schema(&self) -> QueueStoreResult<()> {
        self.run_blocking(|connection| {
            use diesel::connection::SimpleConnection;
            connection
                .batch_execute(super::SCHEMA_SQL)
                .map_err(QueueStoreError::persistence)
        })
        .await
    }

    async fn run_blocking<F, T>(&self, f: F) -> QueueStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueueStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(QueueStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(QueueStoreError::persistence)?
    }
}

impl From<diesel::result::Error> for QueueStoreError {
    fn from(err: diesel::result::Error) -> Self {
        Self::persistence(err)
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn insert(&self, task: &NewQueueTask) -> QueueStoreResult<TaskId> {
        let new_row = to_new_row(task);
        let queue = task.name().as_str().to_owned();
        let channel = self
            .capabilities
            .notifications
            .then(|| self.channel.clone());

        self.run_blocking(move |connection| {
            connection.transaction::<_, QueueStoreError, _>(|tx| {
                let id = diesel::insert_into(queue_tasks::table)
                    .values(&new_row)
                    .returning(queue_tasks::id)
                    .get_result::<i64>(tx)?;
                // Delivered on commit, so listeners never see an invisible row.
                if let Some(target) = channel.as_deref() {
                    diesel::sql_query("SELECT pg_notify($1, $2)")
                        .bind::<Text, _>(target)
                        .bind::<Text, _>(&queue)
                        .execute(tx)?;
                }
                Ok(TaskId::new(id))
            })
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> QueueStoreResult<Option<QueueTask>> {
        self.run_blocking(move |connection| {
            let row = queue_tasks::table
                .find(id.value())
                .select(QueueTaskRow::as_select())
                .first::<QueueTaskRow>(connection)
                .optional()?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn update(&self, task: &QueueTask) -> QueueStoreResult<()> {
        let update = TaskUpdate::from_task(task);
        self.run_blocking(move |connection| update.apply(connection))
            .await
    }

    async fn pull(&self, name: Option<&QueueName>) -> QueueStoreResult<PullOutcome> {
        let filter = name.map(|queue| queue.as_str().to_owned());
        let limit = self.candidate_limit;
        let returning = self.capabilities.returning;

        let outcome = self
            .run_blocking(move |connection| {
                if returning {
                    pull_returning(connection, filter.as_deref(), limit)
                } else {
                    pull_select_then_update(connection, filter.as_deref(), limit)
                }
            })
            .await?;

        match &outcome.claimed {
            Some(claimed) => debug!(task_id = %claimed.id, queue = %claimed.name, "claimed task"),
            None => trace!(next_wakeup = ?outcome.next_wakeup, "no claimable task"),
        }
        Ok(outcome)
    }

    async fn begin(&self) -> QueueStoreResult<Box<dyn QueueTransaction>> {
        let pool = self.pool.clone();
        let connection = tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(QueueStoreError::persistence)?;
            AnsiTransactionManager::begin_transaction(&mut *connection)?;
            Ok::<_, QueueStoreError>(connection)
        })
        .await
        .map_err(QueueStoreError::persistence)??;
        Ok(Box::new(PostgresQueueTransaction {
            connection: Some(connection),
        }))
    }
}

/// Mutable columns written by an update.
#[derive(Debug, Clone, Copy)]
struct TaskUpdate {
    id: TaskId,
    priority: Option<i32>,
    dequeued_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    const fn from_task(task: &QueueTask) -> Self {
        Self {
            id: task.id(),
            priority: task.priority(),
            dequeued_at: task.dequeued_at(),
            finished_at: task.finished_at(),
        }
    }

    fn apply(self, connection: &mut PgConnection) -> QueueStoreResult<()> {
        let affected = diesel::sql_query(UPDATE_TASK_SQL)
            .bind::<BigInt, _>(self.id.value())
            .bind::<Nullable<Integer>, _>(self.priority)
            .bind::<Nullable<Timestamptz>, _>(self.dequeued_at)
            .bind::<Nullable<Timestamptz>, _>(self.finished_at)
            .execute(connection)?;
        if affected == 0 {
            return Err(QueueStoreError::NotFound(self.id));
        }
        Ok(())
    }
}

/// Unit of work holding one pooled connection inside a transaction.
///
/// Staged updates keep their rows locked until commit or rollback. A unit
/// dropped while open returns a connection the pool reports as broken, so
/// it is discarded instead of reused.
struct PostgresQueueTransaction {
    connection: Option<QueuePgConnection>,
}

impl PostgresQueueTransaction {
    async fn with_connection<F, T>(&mut self, f: F) -> QueueStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueueStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut held = self.connection.take().ok_or_else(transaction_ended)?;
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut held);
            (held, result)
        })
        .await
        .map_err(QueueStoreError::persistence)?;
        self.connection = Some(returned);
        result
    }
}

fn transaction_ended() -> QueueStoreError {
    QueueStoreError::persistence(std::io::Error::other("queue transaction already ended"))
}

#[async_trait]
impl QueueTransaction for PostgresQueueTransaction {
    async fn update(&mut self, task: &QueueTask) -> QueueStoreResult<()> {
        let update = TaskUpdate::from_task(task);
        self.with_connection(move |connection| update.apply(connection))
            .await
    }

    async fn commit(mut self: Box<Self>) -> QueueStoreResult<()> {
        self.with_connection(|connection| {
            AnsiTransactionManager::commit_transaction(connection)?;
            Ok(())
        })
        .await
    }

    async fn rollback(mut self: Box<Self>) -> QueueStoreResult<()> {
        self.with_connection(|connection| {
            AnsiTransactionManager::rollback_transaction(connection)?;
            Ok(())
        })
        .await
    }
}

fn pull_returning(
    connection: &mut PgConnection,
    name: Option<&str>,
    limit: i64,
) -> QueueStoreResult<PullOutcome> {
    let row = diesel::sql_query(PULL_RETURNING_SQL)
        .bind::<Nullable<Varchar>, _>(name)
        .bind::<BigInt, _>(limit)
        .get_result::<PullRow>(connection)
        .optional()?;

    let Some(row) = row else {
        return Ok(PullOutcome::empty());
    };
    let claimed = match (row.id, row.name) {
        (Some(id), Some(queue)) => Some(claimed_task(id, queue, row.priority)?),
        _ => None,
    };
    Ok(PullOutcome {
        claimed,
        next_wakeup: seconds_to_duration(row.seconds),
    })
}

/// Claims without `RETURNING`: lock, then update, then compute the hint.
///
/// The lock and the update share one transaction here. Backends that lack
/// row locks as well leave a window in which two workers pick the same row;
/// the `dequeued_at IS NULL` guard lets only one update land, and the worker
/// whose update touched no row reports no claim.
fn pull_select_then_update(
    connection: &mut PgConnection,
    name: Option<&str>,
    limit: i64,
) -> QueueStoreResult<PullOutcome> {
    connection.transaction::<_, QueueStoreError, _>(|tx| {
        let locked = diesel::sql_query(LOCK_CANDIDATE_SQL)
            .bind::<Nullable<Varchar>, _>(name)
            .bind::<BigInt, _>(limit)
            .get_result::<LockedCandidateRow>(tx)
            .optional()?;

        let claimed = match locked {
            Some(row) => {
                let affected = diesel::sql_query(CLAIM_LOCKED_SQL)
                    .bind::<BigInt, _>(row.id)
                    .execute(tx)?;
                claim_if_updated(affected, row)?
            }
            None => None,
        };

        let hint = diesel::sql_query(NEXT_WAKEUP_SQL)
            .bind::<Nullable<Varchar>, _>(name)
            .bind::<BigInt, _>(limit)
            .get_result::<NextWakeupRow>(tx)
            .optional()?;

        Ok(PullOutcome {
            claimed,
            next_wakeup: seconds_to_duration(hint.and_then(|row| row.seconds)),
        })
    })
}

fn claim_if_updated(
    affected: usize,
    row: LockedCandidateRow,
) -> QueueStoreResult<Option<ClaimedTask>> {
    if affected == 0 {
        return Ok(None);
    }
    claimed_task(row.id, row.name, row.priority).map(Some)
}

fn claimed_task(id: i64, name: String, priority: Option<i32>) -> QueueStoreResult<ClaimedTask> {
    Ok(ClaimedTask {
        id: TaskId::new(id),
        name: QueueName::new(name).map_err(QueueStoreError::persistence)?,
        priority,
    })
}

fn seconds_to_duration(seconds: Option<f64>) -> Option<Duration> {
    seconds.and_then(|value| Duration::try_from_secs_f64(value).ok())
}

fn to_new_row(task: &NewQueueTask) -> NewQueueTaskRow {
    NewQueueTaskRow {
        name: task.name().as_str().to_owned(),
        priority: task.priority(),
        data: task.data().clone(),
        enqueued_at: task.enqueued_at(),
        scheduled_at: task.scheduled_at(),
        expected_at: task.expected_at(),
    }
}

fn row_to_task(row: QueueTaskRow) -> QueueStoreResult<QueueTask> {
    let QueueTaskRow {
        id,
        name,
        priority,
        data,
        enqueued_at,
        scheduled_at,
        expected_at,
        dequeued_at,
        finished_at,
    } = row;

    Ok(QueueTask::from_persisted(PersistedQueueTaskData {
        id: TaskId::new(id),
        name: QueueName::new(name).map_err(QueueStoreError::persistence)?,
        priority,
        data,
        enqueued_at,
        scheduled_at,
        expected_at,
        dequeued_at,
        finished_at,
    }))
}
