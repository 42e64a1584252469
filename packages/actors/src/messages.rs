//! Message types for actor communication.

use queue_core::{
    HookFn, HookKind, Job, JobStatus, Outcome, QueueError, QueueStats, Snapshot, Ticket,
};
use ractor::RpcReplyPort;
use serde_json::Value;

use crate::persistence::PersistenceError;

/// Messages for the QueueActor.
pub enum QueueMessage {
    /// Insert jobs built by the client. An empty batch still marks the
    /// queue started.
    Enqueue { jobs: Vec<Job>, priority: bool },

    /// Deferred dispatch attempt.
    Dispatch,

    /// Deferred worker invocation for a dispatched job.
    Run { ticket: Ticket, data: Value },

    /// Worker finished an invocation.
    Complete { ticket: Ticket, outcome: Outcome },

    /// Pause the queue.
    Pause,

    /// Resume the queue.
    Resume,

    /// Drop all waiting jobs.
    Kill { reply: RpcReplyPort<usize> },

    /// Remove waiting jobs with this payload.
    Remove {
        data: Value,
        reply: RpcReplyPort<usize>,
    },

    /// Look up where a payload lives.
    Status {
        data: Value,
        reply: RpcReplyPort<JobStatus>,
    },

    /// Payloads of one collection.
    ListJobs {
        status: JobStatus,
        reply: RpcReplyPort<Vec<Value>>,
    },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Export payloads for persistence.
    Snapshot { reply: RpcReplyPort<Snapshot> },

    /// Load payloads into a queue that never had work.
    Restore {
        snapshot: Snapshot,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    SetConcurrency {
        value: i64,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    SetBuffer {
        value: f64,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Install or clear a lifecycle hook.
    SetHook {
        kind: HookKind,
        hook: Option<HookFn>,
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Stop the actor. Active workers are abandoned.
    Shutdown,
}

impl QueueMessage {
    fn name(&self) -> &'static str {
        match self {
            QueueMessage::Enqueue { .. } => "Enqueue",
            QueueMessage::Dispatch => "Dispatch",
            QueueMessage::Run { .. } => "Run",
            QueueMessage::Complete { .. } => "Complete",
            QueueMessage::Pause => "Pause",
            QueueMessage::Resume => "Resume",
            QueueMessage::Kill { .. } => "Kill",
            QueueMessage::Remove { .. } => "Remove",
            QueueMessage::Status { .. } => "Status",
            QueueMessage::ListJobs { .. } => "ListJobs",
            QueueMessage::GetStats { .. } => "GetStats",
            QueueMessage::Snapshot { .. } => "Snapshot",
            QueueMessage::Restore { .. } => "Restore",
            QueueMessage::SetConcurrency { .. } => "SetConcurrency",
            QueueMessage::SetBuffer { .. } => "SetBuffer",
            QueueMessage::SetHook { .. } => "SetHook",
            QueueMessage::Shutdown => "Shutdown",
        }
    }
}

impl std::fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueMessage::Run { ticket, .. } | QueueMessage::Complete { ticket, .. } => {
                write!(f, "QueueMessage::{}({})", self.name(), ticket)
            }
            _ => write!(f, "QueueMessage::{}", self.name()),
        }
    }
}

/// Result type for client operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("failed to spawn queue actor: {0}")]
    Spawn(String),

    #[error("queue actor is not running")]
    Stopped,
}
