//! Core of the concurrency-bounded job queue.
//!
//! This crate contains the scheduler state machine and its domain types:
//! - Job, Ticket and Outcome for work items and worker results
//! - QueueConfig, Snapshot and QueueStats for configuration and persistence
//! - Hooks and QueueEvent for lifecycle notifications
//! - Scheduler, which owns the job collections and the dispatch loop

mod error;
mod events;
mod job;
mod queue;
mod scheduler;

pub use error::{QueueError, QueueResult};
pub use events::{ErrorHook, HookFn, HookKind, Hooks, QueueEvent, ResultsHook, SignalHook};
pub use job::{
    Job, JobCallback, JobFailure, JobId, JobResult, JobStatus, Outcome, Ticket, job_callback,
};
pub use queue::{Concurrency, QueueConfig, QueueStats, Snapshot};
pub use scheduler::{Dispatch, Scheduler};
