//! Lifecycle hooks and the event records mirroring them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueError;
use crate::{JobFailure, JobId};

/// Hook taking no arguments (`drain`, `empty`, `saturated`, `unsaturated`).
pub type SignalHook = Box<dyn FnMut() + Send>;

/// Hook receiving a payload and result values (`success`, `retry`).
pub type ResultsHook = Box<dyn FnMut(&Value, &[Value]) + Send>;

/// Hook receiving a payload and its failure (`error`).
pub type ErrorHook = Box<dyn FnMut(&Value, &JobFailure) + Send>;

/// The seven named hook slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Drain,
    Empty,
    Saturated,
    Unsaturated,
    Error,
    Success,
    Retry,
}

impl HookKind {
    pub const ALL: [HookKind; 7] = [
        HookKind::Drain,
        HookKind::Empty,
        HookKind::Saturated,
        HookKind::Unsaturated,
        HookKind::Error,
        HookKind::Success,
        HookKind::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Drain => "drain",
            HookKind::Empty => "empty",
            HookKind::Saturated => "saturated",
            HookKind::Unsaturated => "unsaturated",
            HookKind::Error => "error",
            HookKind::Success => "success",
            HookKind::Retry => "retry",
        }
    }

    fn expected_shape(&self) -> &'static str {
        match self {
            HookKind::Drain | HookKind::Empty | HookKind::Saturated | HookKind::Unsaturated => {
                "signal"
            }
            HookKind::Success | HookKind::Retry => "results",
            HookKind::Error => "error",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| QueueError::UnknownHook(s.to_string()))
    }
}

/// A hook closure of any shape, for registration by name.
pub enum HookFn {
    Signal(SignalHook),
    Results(ResultsHook),
    Error(ErrorHook),
}

impl HookFn {
    pub fn signal(f: impl FnMut() + Send + 'static) -> Self {
        HookFn::Signal(Box::new(f))
    }

    pub fn results(f: impl FnMut(&Value, &[Value]) + Send + 'static) -> Self {
        HookFn::Results(Box::new(f))
    }

    pub fn error(f: impl FnMut(&Value, &JobFailure) + Send + 'static) -> Self {
        HookFn::Error(Box::new(f))
    }

    fn shape(&self) -> &'static str {
        match self {
            HookFn::Signal(_) => "signal",
            HookFn::Results(_) => "results",
            HookFn::Error(_) => "error",
        }
    }
}

impl fmt::Debug for HookFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookFn::{}", self.shape())
    }
}

fn noop_signal() -> SignalHook {
    Box::new(|| {})
}

fn noop_results() -> ResultsHook {
    Box::new(|_, _| {})
}

fn noop_error() -> ErrorHook {
    Box::new(|_, _| {})
}

/// One typed slot per lifecycle event. Empty slots are no-ops.
pub struct Hooks {
    pub(crate) drain: SignalHook,
    pub(crate) empty: SignalHook,
    pub(crate) saturated: SignalHook,
    pub(crate) unsaturated: SignalHook,
    pub(crate) error: ErrorHook,
    pub(crate) success: ResultsHook,
    pub(crate) retry: ResultsHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            drain: noop_signal(),
            empty: noop_signal(),
            saturated: noop_signal(),
            unsaturated: noop_signal(),
            error: noop_error(),
            success: noop_results(),
            retry: noop_results(),
        }
    }
}

impl Hooks {
    pub fn on_drain(&mut self, f: Option<impl FnMut() + Send + 'static>) {
        self.drain = f.map_or_else(noop_signal, |f| Box::new(f) as SignalHook);
    }

    pub fn on_empty(&mut self, f: Option<impl FnMut() + Send + 'static>) {
        self.empty = f.map_or_else(noop_signal, |f| Box::new(f) as SignalHook);
    }

    pub fn on_saturated(&mut self, f: Option<impl FnMut() + Send + 'static>) {
        self.saturated = f.map_or_else(noop_signal, |f| Box::new(f) as SignalHook);
    }

    pub fn on_unsaturated(&mut self, f: Option<impl FnMut() + Send + 'static>) {
        self.unsaturated = f.map_or_else(noop_signal, |f| Box::new(f) as SignalHook);
    }

    pub fn on_error(&mut self, f: Option<impl FnMut(&Value, &JobFailure) + Send + 'static>) {
        self.error = f.map_or_else(noop_error, |f| Box::new(f) as ErrorHook);
    }

    pub fn on_success(&mut self, f: Option<impl FnMut(&Value, &[Value]) + Send + 'static>) {
        self.success = f.map_or_else(noop_results, |f| Box::new(f) as ResultsHook);
    }

    pub fn on_retry(&mut self, f: Option<impl FnMut(&Value, &[Value]) + Send + 'static>) {
        self.retry = f.map_or_else(noop_results, |f| Box::new(f) as ResultsHook);
    }

    /// Reset a slot to its no-op.
    pub fn clear(&mut self, kind: HookKind) {
        match kind {
            HookKind::Drain => self.drain = noop_signal(),
            HookKind::Empty => self.empty = noop_signal(),
            HookKind::Saturated => self.saturated = noop_signal(),
            HookKind::Unsaturated => self.unsaturated = noop_signal(),
            HookKind::Error => self.error = noop_error(),
            HookKind::Success => self.success = noop_results(),
            HookKind::Retry => self.retry = noop_results(),
        }
    }

    /// Install a hook by slot, checking that its shape fits. `None` clears
    /// the slot.
    pub fn set(&mut self, kind: HookKind, hook: Option<HookFn>) -> Result<(), QueueError> {
        let Some(hook) = hook else {
            self.clear(kind);
            return Ok(());
        };
        match (kind, hook) {
            (HookKind::Drain, HookFn::Signal(f)) => self.drain = f,
            (HookKind::Empty, HookFn::Signal(f)) => self.empty = f,
            (HookKind::Saturated, HookFn::Signal(f)) => self.saturated = f,
            (HookKind::Unsaturated, HookFn::Signal(f)) => self.unsaturated = f,
            (HookKind::Error, HookFn::Error(f)) => self.error = f,
            (HookKind::Success, HookFn::Results(f)) => self.success = f,
            (HookKind::Retry, HookFn::Results(f)) => self.retry = f,
            (kind, _) => {
                return Err(QueueError::TypeMismatch {
                    hook: kind,
                    expected: kind.expected_shape(),
                });
            }
        }
        Ok(())
    }

    /// Install a hook by name.
    pub fn set_by_name(&mut self, name: &str, hook: Option<HookFn>) -> Result<(), QueueError> {
        let kind: HookKind = name.parse()?;
        self.set(kind, hook)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// Record of something the scheduler did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job entered `waiting`.
    Enqueued {
        job_id: JobId,
        data: Value,
        priority: bool,
        enqueued_at: DateTime<Utc>,
    },
    /// A job moved to `active` and its worker invocation was scheduled.
    Dispatched {
        job_id: JobId,
        data: Value,
        attempt: u32,
        delay_ms: u64,
    },
    /// An attempt found both `waiting` and `active` empty.
    ///
    /// Recorded on every idle attempt, also after a kill has silenced the
    /// drain hook.
    Drain,
    /// The last waiting job was dispatched.
    Empty,
    /// `active` reached the concurrency limit.
    Saturated,
    /// `active` fell back through the buffer threshold.
    Unsaturated,
    Success {
        job_id: JobId,
        data: Value,
        results: Vec<Value>,
    },
    Failed {
        job_id: JobId,
        data: Value,
        failure: JobFailure,
    },
    Retry {
        job_id: JobId,
        data: Value,
        front: bool,
        results: Vec<Value>,
    },
    Paused,
    Resumed,
    Killed {
        discarded: usize,
    },
    Removed {
        data: Value,
        count: usize,
    },
    Restored {
        waiting: usize,
        failed: usize,
        finished: usize,
    },
}

impl QueueEvent {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::Enqueued { job_id, .. }
            | QueueEvent::Dispatched { job_id, .. }
            | QueueEvent::Success { job_id, .. }
            | QueueEvent::Failed { job_id, .. }
            | QueueEvent::Retry { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// The hook this event mirrors, if any.
    pub fn hook(&self) -> Option<HookKind> {
        match self {
            QueueEvent::Drain => Some(HookKind::Drain),
            QueueEvent::Empty => Some(HookKind::Empty),
            QueueEvent::Saturated => Some(HookKind::Saturated),
            QueueEvent::Unsaturated => Some(HookKind::Unsaturated),
            QueueEvent::Success { .. } => Some(HookKind::Success),
            QueueEvent::Failed { .. } => Some(HookKind::Error),
            QueueEvent::Retry { .. } => Some(HookKind::Retry),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::Enqueued {
                job_id, priority, ..
            } => {
                let place = if *priority { "head" } else { "tail" };
                format!("Job {} enqueued at {}", job_id, place)
            }
            QueueEvent::Dispatched {
                job_id,
                attempt,
                delay_ms,
                ..
            } => format!(
                "Job {} dispatched (attempt {}, delay {}ms)",
                job_id, attempt, delay_ms
            ),
            QueueEvent::Drain => "Queue drained".to_string(),
            QueueEvent::Empty => "Waiting list empty".to_string(),
            QueueEvent::Saturated => "Queue saturated".to_string(),
            QueueEvent::Unsaturated => "Queue unsaturated".to_string(),
            QueueEvent::Success { job_id, .. } => format!("Job {} finished", job_id),
            QueueEvent::Failed {
                job_id, failure, ..
            } => format!("Job {} failed: {}", job_id, failure),
            QueueEvent::Retry { job_id, front, .. } => {
                let place = if *front { "head" } else { "tail" };
                format!("Job {} retrying from {}", job_id, place)
            }
            QueueEvent::Paused => "Queue paused".to_string(),
            QueueEvent::Resumed => "Queue resumed".to_string(),
            QueueEvent::Killed { discarded } => {
                format!("Queue killed, {} waiting jobs discarded", discarded)
            }
            QueueEvent::Removed { count, .. } => format!("{} waiting jobs removed", count),
            QueueEvent::Restored {
                waiting,
                failed,
                finished,
            } => format!(
                "Restored {} waiting, {} failed, {} finished",
                waiting, failed, finished
            ),
        }
    }
}
