//! `PostgreSQL` adapters for the task queue.

mod listener;
mod models;
mod schema;
mod store;

pub use listener::{DEFAULT_POLL_INTERVAL, PostgresQueueListener, quote_identifier};
pub use schema::SCHEMA_SQL;
pub use store::{
    BackendCapabilities, DEFAULT_CANDIDATE_LIMIT, DEFAULT_CHANNEL, PostgresQueueStore,
    QueuePgPool,
};
