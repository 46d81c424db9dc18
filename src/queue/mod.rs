//! Persisted task queue.
//!
//! Producers enqueue deferred method calls through [`services::QueueCaller`];
//! workers claim them with the dequeue planner behind
//! [`ports::QueueStore::pull`] and execute them with
//! [`services::QueueRunner`]. The store is the only shared state: claims are
//! row locks taken with skip-locked semantics, so any number of workers and
//! processes can consume the same table.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;
