//! Port contracts for the task queue.
//!
//! Ports define infrastructure-agnostic interfaces used by queue services.

pub mod listener;
pub mod resolver;
pub mod store;

pub use listener::{ListenerError, ListenerResult, QueueListener};
pub use resolver::{
    CallTarget, Invocation, ModelError, ModelHandle, ModelResolver, ModelResult, ResolveError,
};
pub use store::{QueueStore, QueueStoreError, QueueStoreResult, QueueTransaction};
