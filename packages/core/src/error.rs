//! Error types for the scheduler.

use thiserror::Error;

use crate::{HookKind, JobId};

/// Errors raised synchronously by scheduler operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    /// Invalid concurrency or buffer setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The payload can not be queued.
    #[error("unable to add {0} to queue")]
    InvalidJobKind(&'static str),

    /// A hook closure does not match the shape its slot expects.
    #[error("hook '{hook}' expects a {expected} callback")]
    TypeMismatch {
        hook: HookKind,
        expected: &'static str,
    },

    #[error("unknown hook: {0}")]
    UnknownHook(String),

    /// State can only be restored into a queue that never had work.
    #[error("unable to restore state after queue started")]
    AlreadyStarted,

    /// A worker reported completion for an invocation that is no longer active.
    #[error("too many completion calls for job {0}")]
    DoubleCompletion(JobId),
}

pub type QueueResult<T> = Result<T, QueueError>;
