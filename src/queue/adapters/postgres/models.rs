//! Diesel row models for queued task persistence.

use super::schema::queue_tasks;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Nullable, Varchar};
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = queue_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QueueTaskRow {
    /// Task identifier.
    pub id: i64,
    /// Queue name.
    pub name: String,
    /// Advisory priority.
    pub priority: Option<i32>,
    /// Payload JSON.
    pub data: Value,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest eligibility timestamp.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Advisory deadline.
    pub expected_at: Option<DateTime<Utc>>,
    /// Claim timestamp.
    pub dequeued_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = queue_tasks)]
pub struct NewQueueTaskRow {
    /// Queue name.
    pub name: String,
    /// Advisory priority.
    pub priority: Option<i32>,
    /// Payload JSON.
    pub data: Value,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest eligibility timestamp.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Advisory deadline.
    pub expected_at: Option<DateTime<Utc>>,
}

/// Single-round-trip planner result.
///
/// Every column is nullable: the row always exists so the wake-up hint is
/// returned even when nothing was claimed.
#[derive(Debug, Clone, QueryableByName)]
pub struct PullRow {
    /// Claimed task identifier.
    #[diesel(sql_type = Nullable<BigInt>)]
    pub id: Option<i64>,
    /// Claimed task queue name.
    #[diesel(sql_type = Nullable<Varchar>)]
    pub name: Option<String>,
    /// Claimed task priority.
    #[diesel(sql_type = Nullable<Integer>)]
    pub priority: Option<i32>,
    /// Seconds until the earliest future candidate is due.
    #[diesel(sql_type = Nullable<Double>)]
    pub seconds: Option<f64>,
}

/// Candidate locked by the select-then-update planner path.
#[derive(Debug, Clone, QueryableByName)]
pub struct LockedCandidateRow {
    /// Locked task identifier.
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    /// Locked task queue name.
    #[diesel(sql_type = Varchar)]
    pub name: String,
    /// Locked task priority.
    #[diesel(sql_type = Nullable<Integer>)]
    pub priority: Option<i32>,
}

/// Wake-up hint computed on its own.
#[derive(Debug, Clone, QueryableByName)]
pub struct NextWakeupRow {
    /// Seconds until the earliest future candidate is due.
    #[diesel(sql_type = Nullable<Double>)]
    pub seconds: Option<f64>,
}
