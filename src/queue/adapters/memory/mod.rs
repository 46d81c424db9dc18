//! In-memory adapters for the task queue.

mod listener;
mod store;

pub use listener::InMemoryQueueListener;
pub use store::{DEFAULT_CANDIDATE_LIMIT, InMemoryQueueStore};
