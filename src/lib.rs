//! Deferq: a persisted, SQL-backed task queue.
//!
//! Producers turn method calls into durable task rows; any number of worker
//! processes claim those rows through a lock-free dequeue planner and run
//! them against registered target types.
//!
//! # Architecture
//!
//! Deferq follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (`PostgreSQL`, memory)
//!
//! # Modules
//!
//! - [`queue`]: Task records, the dequeue planner, runner and caller proxy
//! - [`config`]: JSON configuration for deployments
//! - [`host`]: Wiring a configured store, listener and worker
//! - [`telemetry`]: Tracing subscriber set-up

pub mod config;
pub mod host;
pub mod queue;
pub mod telemetry;
