//! CPU benchmark engine
//!
//! Contains the wall-clock deadline, the primality primitives and the
//! worker pool that shards prime counting across all cores.

pub mod deadline;
pub mod prime;
pub mod worker;

// Re-export commonly used types
pub use deadline::{Deadline, StopSignal};
pub use worker::{
    run_sieve_benchmark, AggregatedProgress, RangeCount, SieveWorkerPool, SieveWorkerState,
    WorkerInfo, WorkerStatus,
};
