//! Queue configuration, statistics and the persisted snapshot format.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueueError, QueueResult};

/// How the scheduler bounds work in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// At most this many jobs are active at once.
    Limit(usize),
    /// One job at a time, with this pause before each follow-up dispatch.
    Delay(Duration),
}

impl Concurrency {
    /// Interpret a raw setting: positive is a limit, negative a delay in
    /// milliseconds.
    pub fn from_raw(value: i64) -> QueueResult<Self> {
        match value {
            0 => Err(QueueError::Configuration(
                "concurrency can not be 0".into(),
            )),
            v if v > 0 => Ok(Concurrency::Limit(v as usize)),
            v => Ok(Concurrency::Delay(Duration::from_millis(v.unsigned_abs()))),
        }
    }

    /// The raw setting; negative in delay mode.
    pub fn as_raw(&self) -> i64 {
        match self {
            Concurrency::Limit(limit) => *limit as i64,
            Concurrency::Delay(delay) => (delay.as_millis() as i64).wrapping_neg(),
        }
    }

    /// Effective number of jobs allowed in `active`.
    pub fn limit(&self) -> usize {
        match self {
            Concurrency::Limit(limit) => *limit,
            Concurrency::Delay(_) => 1,
        }
    }

    /// Delay applied to follow-up dispatches.
    pub fn delay(&self) -> Duration {
        match self {
            Concurrency::Limit(_) => Duration::ZERO,
            Concurrency::Delay(delay) => *delay,
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Limit(limit) => write!(f, "limit {}", limit),
            Concurrency::Delay(delay) => write!(f, "delay {}ms", delay.as_millis()),
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Positive: max jobs in flight. Negative: delay mode, in milliseconds.
    pub concurrency: i64,
    /// Saturation slack; defaults to a quarter of the limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<f64>,
    /// Start with dispatching paused.
    pub paused: bool,
    /// Name of the queue, used for the actor name and in logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            buffer: None,
            paused: false,
            name: None,
        }
    }
}

impl QueueConfig {
    /// Create a config with the given concurrency setting.
    pub fn new(concurrency: i64) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Set the saturation buffer.
    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Start the queue paused.
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Set the queue name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parsed concurrency mode.
    pub fn concurrency_mode(&self) -> QueueResult<Concurrency> {
        Concurrency::from_raw(self.concurrency)
    }

    /// Buffer to use, falling back to a quarter of the effective limit.
    pub fn effective_buffer(&self) -> QueueResult<f64> {
        let mode = self.concurrency_mode()?;
        match self.buffer {
            Some(buffer) => validate_buffer(buffer),
            None => Ok(mode.limit() as f64 / 4.0),
        }
    }

    /// Check the config without building a scheduler.
    pub fn validate(&self) -> QueueResult<()> {
        self.effective_buffer().map(|_| ())
    }
}

pub(crate) fn validate_buffer(buffer: f64) -> QueueResult<f64> {
    if !buffer.is_finite() {
        return Err(QueueError::Configuration(format!(
            "buffer must be a number, got {}",
            buffer
        )));
    }
    if buffer < 0.0 {
        return Err(QueueError::Configuration(format!(
            "buffer can not be negative, got {}",
            buffer
        )));
    }
    Ok(buffer)
}

/// Payload-only export of a queue, used for persistence.
///
/// Active jobs are folded into `waiting`: after a restart they are unfinished
/// work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub waiting: Vec<Value>,
    pub failed: Vec<Value>,
    pub finished: Vec<Value>,
}

impl Snapshot {
    /// Total number of payloads in the snapshot.
    pub fn len(&self) -> usize {
        self.waiting.len() + self.failed.len() + self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-in-time view of a queue's counters and flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub failed: usize,
    pub finished: usize,
    pub concurrency: i64,
    pub buffer: f64,
    pub paused: bool,
    pub started: bool,
    pub saturated: bool,
}

impl QueueStats {
    /// Jobs not yet finished (waiting + active).
    pub fn pending(&self) -> usize {
        self.waiting + self.active
    }

    /// Total processed jobs.
    pub fn processed(&self) -> usize {
        self.finished + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.finished as f64 / total as f64) * 100.0)
        }
    }
}
