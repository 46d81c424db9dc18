//! Orchestration services for producers, workers and operators.

mod caller;
mod queue;
mod registry;
mod runner;
mod worker;

pub use caller::{
    ATOMIC_KWARG, CHECK_ACCESS_KEY, CallContext, CallError, CallResult, DeferredCall,
    EXPECTED_DELAY_KEY, ModelCaller, PRIORITY_KEY, QUEUE_NAME_KEY, QueueCaller,
    SCHEDULED_DELAY_KEY,
};
pub use queue::{PushOptions, QueueService, QueueServiceError, QueueServiceResult};
pub use registry::ModelRegistry;
pub use runner::{ID_LOOKUP_CHUNK, QueueRunner, RunError, RunOutcome, RunResult};
pub use worker::{
    DEFAULT_MAX_IDLE, QueueWorker, WorkerError, WorkerReport, WorkerResult, WorkerSettings,
};
