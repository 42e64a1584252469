//! Job domain types for work items in the queue.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::{QueueError, QueueResult};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one worker invocation of a job.
///
/// A job that is retried gets a fresh ticket on every dispatch, so a
/// completion carrying an old ticket can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub job_id: JobId,
    pub attempt: u32,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job_id, self.attempt)
    }
}

/// Which collection a payload currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Finished,
    Failed,
    Missing,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Human-readable error message.
    pub error: String,
    /// Extra values the worker passed along with the error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<Value>,
}

impl JobFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            results: Vec::new(),
        }
    }

    pub fn with_results(error: impl Into<String>, results: Vec<Value>) -> Self {
        Self {
            error: error.into(),
            results,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

/// What a worker reports when it finishes one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Put the job back into `waiting`, at the head when `front` is set.
    Retry {
        front: bool,
        #[serde(default)]
        results: Vec<Value>,
    },
    /// The job finished; the values are handed to callbacks and hooks.
    Success {
        #[serde(default)]
        results: Vec<Value>,
    },
    /// The job failed and moves to `failed`.
    Failure(JobFailure),
}

impl Outcome {
    pub fn success(results: Vec<Value>) -> Self {
        Outcome::Success { results }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Outcome::Failure(JobFailure::new(error))
    }

    pub fn retry(front: bool) -> Self {
        Outcome::Retry {
            front,
            results: Vec::new(),
        }
    }

    /// Check if the outcome moves the job to a terminal collection.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Retry { .. })
    }
}

/// Terminal result handed to a per-job callback.
pub type JobResult<'a> = Result<&'a [Value], &'a JobFailure>;

/// Per-job completion callback, shared by every job of one enqueue call.
///
/// Receives the job's payload and its terminal result. Never invoked for a
/// retry.
pub type JobCallback = Arc<dyn Fn(&Value, JobResult<'_>) + Send + Sync>;

/// Wrap a closure as a [`JobCallback`].
pub fn job_callback(f: impl Fn(&Value, JobResult<'_>) + Send + Sync + 'static) -> JobCallback {
    Arc::new(f)
}

/// A job represents a unit of work tracked by the scheduler.
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Caller-supplied payload.
    pub data: Value,
    /// Number of times the job has been dispatched.
    pub attempts: u32,
    /// When the job entered the queue.
    pub enqueued_at: DateTime<Utc>,
    callback: Option<JobCallback>,
}

impl Job {
    /// Create a new job for the given payload.
    pub fn new(data: Value) -> Self {
        Self {
            id: JobId::new(),
            data,
            attempts: 0,
            enqueued_at: Utc::now(),
            callback: None,
        }
    }

    /// Build one job per payload, flattening arrays recursively. Every job
    /// shares `callback`. A null anywhere rejects the whole batch.
    pub fn batch(data: Value, callback: Option<JobCallback>) -> QueueResult<Vec<Job>> {
        let mut payloads = Vec::new();
        flatten(data, &mut payloads)?;
        Ok(payloads
            .into_iter()
            .map(|data| Job::new(data).with_callback(callback.clone()))
            .collect())
    }

    /// Set the completion callback for this job.
    pub fn with_callback(mut self, callback: Option<JobCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// The ticket of the most recent dispatch.
    pub fn ticket(&self) -> Ticket {
        Ticket {
            job_id: self.id,
            attempt: self.attempts,
        }
    }

    pub(crate) fn notify(&self, result: JobResult<'_>) {
        if let Some(callback) = &self.callback {
            callback(&self.data, result);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("attempts", &self.attempts)
            .field("enqueued_at", &self.enqueued_at)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn flatten(data: Value, out: &mut Vec<Value>) -> QueueResult<()> {
    match data {
        Value::Null => Err(QueueError::InvalidJobKind("null")),
        Value::Array(items) => items.into_iter().try_for_each(|item| flatten(item, out)),
        other => {
            out.push(other);
            Ok(())
        }
    }
}
