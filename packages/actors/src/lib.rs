//! Actor runtime for the job queue.
//!
//! Each queue is one Ractor actor that owns a [`queue_core::Scheduler`].
//! The actor mailbox serializes every state transition, and deferred work
//! (dispatch attempts, worker invocations, delay-mode timers) re-enters the
//! actor as messages.
//!
//! # Architecture
//!
//! - `QueueActor` - Owns the scheduler and invokes the worker
//! - `TaskQueue` - Cloneable client handle used to talk to the actor
//! - `Worker` - User code run once per dispatched job
//! - `StatePersistence` - Snapshot files for restarts
//!
//! # Usage
//!
//! ```ignore
//! use actors::{FnWorker, TaskQueue};
//! use queue_core::QueueConfig;
//!
//! let worker = FnWorker::new(|data, done| done.success(vec![data]));
//! let (queue, _handle) = TaskQueue::spawn(worker, QueueConfig::new(4)).await?;
//!
//! queue.on_drain(|| tracing::info!("all done")).await?;
//! queue.push(serde_json::json!(["a", "b", "c"]))?;
//! ```

mod handle;
mod messages;
mod persistence;
mod queue_actor;
mod worker;

pub use handle::TaskQueue;
pub use messages::{ActorError, ActorResult, QueueMessage};
pub use persistence::{PersistenceError, StatePersistence};
pub use queue_actor::{QueueActor, QueueActorState};
pub use worker::{ABANDONED, AsyncWorker, Done, FnWorker, WorkFuture, Worker};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};

#[doc(hidden)]
pub use serde_json as __serde_json;
