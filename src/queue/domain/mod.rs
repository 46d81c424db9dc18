//! Domain model for the persisted task queue.
//!
//! Tasks, deferred-call payloads and planner results live here, free of any
//! storage or runtime concerns.

mod error;
mod ids;
mod payload;
mod task;

pub use error::QueueDomainError;
pub use ids::{QueueName, TaskId, UserId};
pub use payload::{ContextMap, ExecutionContext, RecordId, Records, TaskPayload};
pub use task::{ClaimedTask, NewQueueTask, PersistedQueueTaskData, PullOutcome, QueueTask};
