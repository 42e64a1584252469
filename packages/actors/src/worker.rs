//! Worker trait and the completion handle passed to it.

use futures_util::future::BoxFuture;
use queue_core::{JobFailure, Outcome, Ticket};
use ractor::ActorRef;
use serde_json::Value;

use crate::messages::QueueMessage;

/// Future type for async workers.
pub type WorkFuture = BoxFuture<'static, Outcome>;

/// Processes one job payload per call.
///
/// `run` is invoked from inside the queue actor, so it must not block: hand
/// long work to a task and keep the [`Done`] handle with it. Every call must
/// eventually complete its `Done` exactly once; until it does, the job
/// occupies a concurrency slot.
pub trait Worker: Send + Sync + 'static {
    fn run(&self, data: Value, done: Done);
}

/// Failure reported for a handle dropped without completing.
pub const ABANDONED: &str = "worker dropped its completion handle";

/// One-shot completion signal for a single worker invocation.
///
/// Completing consumes the handle. Dropping it without completing, including
/// when an async worker panics, fails the job with [`ABANDONED`] so its
/// concurrency slot is released.
pub struct Done {
    ticket: Ticket,
    queue: ActorRef<QueueMessage>,
    completed: bool,
}

impl Done {
    pub(crate) fn new(ticket: Ticket, queue: ActorRef<QueueMessage>) -> Self {
        Self {
            ticket,
            queue,
            completed: false,
        }
    }

    /// The invocation this handle completes.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Report the outcome of this invocation.
    pub fn complete(mut self, outcome: Outcome) {
        self.send(outcome);
    }

    pub fn success(self, results: Vec<Value>) {
        self.complete(Outcome::Success { results });
    }

    pub fn fail(self, error: impl Into<String>) {
        self.complete(Outcome::Failure(JobFailure::new(error)));
    }

    /// Send the job back to `waiting`, to the head when `front` is set.
    pub fn retry(self, front: bool) {
        self.complete(Outcome::retry(front));
    }

    fn send(&mut self, outcome: Outcome) {
        self.completed = true;
        let message = QueueMessage::Complete {
            ticket: self.ticket,
            outcome,
        };
        if self.queue.send_message(message).is_err() {
            tracing::warn!("Queue stopped before job {} completed", self.ticket);
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!("Completion handle for job {} dropped, failing it", self.ticket);
            self.send(Outcome::failure(ABANDONED));
        }
    }
}

impl std::fmt::Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("ticket", &self.ticket)
            .field("completed", &self.completed)
            .finish()
    }
}

/// A worker backed by a plain closure.
pub struct FnWorker<F>
where
    F: Fn(Value, Done) + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnWorker<F>
where
    F: Fn(Value, Done) + Send + Sync + 'static,
{
    /// Create a new function-based worker.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Worker for FnWorker<F>
where
    F: Fn(Value, Done) + Send + Sync + 'static,
{
    fn run(&self, data: Value, done: Done) {
        (self.handler)(data, done)
    }
}

/// A worker whose closure returns a future; each invocation runs on its own
/// tokio task and completes with the future's output.
pub struct AsyncWorker<F>
where
    F: Fn(Value) -> WorkFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> AsyncWorker<F>
where
    F: Fn(Value) -> WorkFuture + Send + Sync + 'static,
{
    /// Create a new async worker.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Worker for AsyncWorker<F>
where
    F: Fn(Value) -> WorkFuture + Send + Sync + 'static,
{
    fn run(&self, data: Value, done: Done) {
        let work = (self.handler)(data);
        tokio::spawn(async move {
            done.complete(work.await);
        });
    }
}

/// Helper macro for creating async workers from an async block.
#[macro_export]
macro_rules! async_worker {
    (|$data:ident| $body:expr) => {
        $crate::AsyncWorker::new(|$data: $crate::__serde_json::Value| {
            ::std::boxed::Box::pin(async move { $body })
        })
    };
}
