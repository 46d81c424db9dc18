//! Diesel schema for queued task persistence.

/// DDL creating the task table and the planner's candidate index.
pub const SCHEMA_SQL: &str =
    include_str!("../../../../migrations/2026-10-16-000000_create_queue_tasks/up.sql");

diesel::table! {
    /// Queued task rows.
    queue_tasks (id) {
        /// Store-assigned task identifier.
        id -> Int8,
        /// Logical queue name.
        #[max_length = 255]
        name -> Varchar,
        /// Advisory priority.
        priority -> Nullable<Int4>,
        /// Opaque task payload.
        data -> Jsonb,
        /// Enqueue timestamp.
        enqueued_at -> Timestamptz,
        /// Earliest eligibility timestamp.
        scheduled_at -> Nullable<Timestamptz>,
        /// Advisory deadline.
        expected_at -> Nullable<Timestamptz>,
        /// Claim timestamp.
        dequeued_at -> Nullable<Timestamptz>,
        /// Completion timestamp.
        finished_at -> Nullable<Timestamptz>,
    }
}
