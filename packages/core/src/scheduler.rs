//! The queue scheduler: four job collections and the dispatch loop.
//!
//! The scheduler never runs workers itself. Every operation that can start
//! work returns [`Dispatch`] commands; the caller defers each one (by its
//! `delay`) and reports the worker's result back through
//! [`Scheduler::complete`]. All methods take `&mut self`, so a single owner
//! serializes every state transition.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{QueueError, QueueResult};
use crate::events::{HookKind, Hooks, QueueEvent};
use crate::job::{Job, JobCallback, JobId, JobStatus, Outcome, Ticket};
use crate::queue::{Concurrency, QueueConfig, QueueStats, Snapshot, validate_buffer};

/// A worker invocation the caller must run after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub ticket: Ticket,
    pub data: Value,
    pub delay: Duration,
}

/// Concurrency-bounded job scheduler.
pub struct Scheduler {
    name: String,
    waiting: VecDeque<Job>,
    active: Vec<Job>,
    failed: Vec<Job>,
    finished: Vec<Job>,
    concurrency: Concurrency,
    buffer: f64,
    paused: bool,
    started: bool,
    saturated: bool,
    hooks: Hooks,
    events: Option<Vec<QueueEvent>>,
}

impl Scheduler {
    /// Create a scheduler from a validated config.
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let concurrency = config.concurrency_mode()?;
        let buffer = config.effective_buffer()?;
        Ok(Self {
            name: config.name.clone().unwrap_or_else(|| "queue".to_string()),
            waiting: VecDeque::new(),
            active: Vec::new(),
            failed: Vec::new(),
            finished: Vec::new(),
            concurrency,
            buffer,
            paused: config.paused,
            started: false,
            saturated: false,
            hooks: Hooks::default(),
            events: None,
        })
    }

    /// Keep a log of [`QueueEvent`]s, drained with [`Scheduler::take_events`].
    pub fn with_event_log(mut self) -> Self {
        self.events = Some(Vec::new());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hook slots, for installing or clearing lifecycle callbacks.
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Drain the event log. Empty when the log is disabled.
    pub fn take_events(&mut self) -> Vec<QueueEvent> {
        self.events.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn record(&mut self, event: QueueEvent) {
        if let Some(events) = self.events.as_mut() {
            events.push(event);
        }
    }

    /// Add one payload, or every element of an array payload, to `waiting`.
    ///
    /// Jobs go to the tail, or to the head when `priority` is set. The caller
    /// owes one deferred [`Scheduler::try_dispatch`] per returned id. A null
    /// payload anywhere rejects the whole call.
    pub fn enqueue(
        &mut self,
        data: Value,
        callback: Option<JobCallback>,
        priority: bool,
    ) -> QueueResult<Vec<JobId>> {
        self.started = true;
        let jobs = Job::batch(data, callback)?;
        Ok(self.insert(jobs, priority))
    }

    /// Add jobs built with [`Job::batch`], in order. Marks the queue started
    /// even when `jobs` is empty.
    pub fn insert(&mut self, jobs: Vec<Job>, priority: bool) -> Vec<JobId> {
        self.started = true;

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            debug!(queue = %self.name, job_id = %job.id, priority, "enqueue");
            ids.push(job.id);
            self.record(QueueEvent::Enqueued {
                job_id: job.id,
                data: job.data.clone(),
                priority,
                enqueued_at: job.enqueued_at,
            });
            if priority {
                self.waiting.push_front(job);
            } else {
                self.waiting.push_back(job);
            }
        }
        ids
    }

    /// Move jobs from `waiting` to `active` until the limit is reached.
    ///
    /// `delayable` marks an attempt made right after a completion; in delay
    /// mode its first dispatch carries the configured delay. Later dispatches
    /// in the same attempt never do.
    pub fn try_dispatch(&mut self, delayable: bool) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let mut delayable = delayable;
        let limit = self.concurrency.limit();

        loop {
            if self.waiting.is_empty() && self.active.is_empty() {
                (self.hooks.drain)();
                self.record(QueueEvent::Drain);
            }

            if self.paused || self.active.len() >= limit {
                break;
            }
            let Some(mut job) = self.waiting.pop_front() else {
                break;
            };

            job.attempts += 1;
            let delay = if delayable {
                self.concurrency.delay()
            } else {
                Duration::ZERO
            };
            delayable = false;

            let dispatch = Dispatch {
                ticket: job.ticket(),
                data: job.data.clone(),
                delay,
            };
            self.active.push(job);

            if self.waiting.is_empty() {
                (self.hooks.empty)();
                self.record(QueueEvent::Empty);
            }
            if self.active.len() == limit && !self.saturated {
                self.saturated = true;
                (self.hooks.saturated)();
                self.record(QueueEvent::Saturated);
            }

            debug!(
                queue = %self.name,
                ticket = %dispatch.ticket,
                delay_ms = delay.as_millis() as u64,
                "dispatch"
            );
            self.record(QueueEvent::Dispatched {
                job_id: dispatch.ticket.job_id,
                data: dispatch.data.clone(),
                attempt: dispatch.ticket.attempt,
                delay_ms: delay.as_millis() as u64,
            });
            dispatches.push(dispatch);
        }

        dispatches
    }

    /// Route a worker's outcome and refill free slots.
    ///
    /// Fails with [`QueueError::DoubleCompletion`] when `ticket` is not the
    /// current invocation of an active job; state is left untouched.
    pub fn complete(&mut self, ticket: Ticket, outcome: Outcome) -> QueueResult<Vec<Dispatch>> {
        let Some(index) = self.active.iter().position(|job| job.ticket() == ticket) else {
            error!(queue = %self.name, %ticket, "completion for a job that is not active");
            return Err(QueueError::DoubleCompletion(ticket.job_id));
        };
        let job = self.active.remove(index);

        match outcome {
            Outcome::Retry { front, results } => {
                debug!(queue = %self.name, %ticket, front, "retry");
                (self.hooks.retry)(&job.data, &results);
                self.record(QueueEvent::Retry {
                    job_id: job.id,
                    data: job.data.clone(),
                    front,
                    results,
                });
                if front {
                    self.waiting.push_front(job);
                } else {
                    self.waiting.push_back(job);
                }
            }
            Outcome::Success { results } => {
                debug!(queue = %self.name, %ticket, "finished");
                job.notify(Ok(results.as_slice()));
                (self.hooks.success)(&job.data, &results);
                self.record(QueueEvent::Success {
                    job_id: job.id,
                    data: job.data.clone(),
                    results,
                });
                self.finished.push(job);
            }
            Outcome::Failure(failure) => {
                debug!(queue = %self.name, %ticket, error = %failure, "failed");
                job.notify(Err(&failure));
                (self.hooks.error)(&job.data, &failure);
                self.record(QueueEvent::Failed {
                    job_id: job.id,
                    data: job.data.clone(),
                    failure,
                });
                self.failed.push(job);
            }
        }

        let threshold = self.concurrency.limit() as f64 - self.buffer;
        if self.saturated && self.active.len() as f64 <= threshold {
            self.saturated = false;
            (self.hooks.unsaturated)();
            self.record(QueueEvent::Unsaturated);
        }

        Ok(self.try_dispatch(true))
    }

    /// Stop starting new jobs. Active jobs keep running.
    pub fn pause(&mut self) {
        info!(queue = %self.name, "pause");
        self.paused = true;
        self.record(QueueEvent::Paused);
    }

    /// Allow dispatching again and attempt it right away.
    pub fn resume(&mut self) -> Vec<Dispatch> {
        info!(queue = %self.name, "resume");
        self.paused = false;
        self.record(QueueEvent::Resumed);
        self.try_dispatch(false)
    }

    /// Discard all waiting jobs and silence the drain hook for good.
    ///
    /// Only the hook goes quiet: the event log keeps recording
    /// [`QueueEvent::Drain`] so subscribers still see the queue go idle.
    pub fn kill(&mut self) -> usize {
        let discarded = self.waiting.len();
        info!(queue = %self.name, discarded, "kill");
        self.hooks.clear(HookKind::Drain);
        self.waiting.clear();
        self.record(QueueEvent::Killed { discarded });
        discarded
    }

    /// Remove every waiting job whose payload equals `data`.
    pub fn remove(&mut self, data: &Value) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|job| job.data != *data);
        let count = before - self.waiting.len();
        debug!(queue = %self.name, count, "remove");
        self.record(QueueEvent::Removed {
            data: data.clone(),
            count,
        });
        count
    }

    /// Number of waiting jobs.
    pub fn length(&self) -> usize {
        self.waiting.len()
    }

    /// Number of active jobs.
    pub fn running(&self) -> usize {
        self.active.len()
    }

    pub fn idle(&self) -> bool {
        self.waiting.is_empty() && self.active.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Where `data` currently lives, searching waiting, active, finished,
    /// then failed.
    pub fn status(&self, data: &Value) -> JobStatus {
        if self.waiting.iter().any(|job| job.data == *data) {
            JobStatus::Waiting
        } else if self.active.iter().any(|job| job.data == *data) {
            JobStatus::Active
        } else if self.finished.iter().any(|job| job.data == *data) {
            JobStatus::Finished
        } else if self.failed.iter().any(|job| job.data == *data) {
            JobStatus::Failed
        } else {
            JobStatus::Missing
        }
    }

    /// Check whether `ticket` is the live invocation of an active job.
    pub fn is_dispatched(&self, ticket: Ticket) -> bool {
        self.active.iter().any(|job| job.ticket() == ticket)
    }

    pub fn waiting(&self) -> impl Iterator<Item = &Job> {
        self.waiting.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Job> {
        self.active.iter()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Job> {
        self.failed.iter()
    }

    pub fn finished(&self) -> impl Iterator<Item = &Job> {
        self.finished.iter()
    }

    /// Payloads of the collection matching `status`, in order.
    pub fn payloads(&self, status: JobStatus) -> Vec<Value> {
        let data = |job: &Job| job.data.clone();
        match status {
            JobStatus::Waiting => self.waiting().map(data).collect(),
            JobStatus::Active => self.active().map(data).collect(),
            JobStatus::Finished => self.finished().map(data).collect(),
            JobStatus::Failed => self.failed().map(data).collect(),
            JobStatus::Missing => Vec::new(),
        }
    }

    /// Export payloads; active jobs are reported as waiting.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            waiting: self
                .waiting()
                .chain(self.active())
                .map(|job| job.data.clone())
                .collect(),
            failed: self.payloads(JobStatus::Failed),
            finished: self.payloads(JobStatus::Finished),
        }
    }

    /// Replace all collections with a snapshot's payloads.
    ///
    /// Only allowed before the queue ever held work. Restored jobs carry no
    /// callback. Dispatches right away unless paused.
    pub fn restore(&mut self, snapshot: Snapshot) -> QueueResult<Vec<Dispatch>> {
        if self.started {
            return Err(QueueError::AlreadyStarted);
        }
        self.started = true;

        info!(
            queue = %self.name,
            waiting = snapshot.waiting.len(),
            failed = snapshot.failed.len(),
            finished = snapshot.finished.len(),
            "restore"
        );
        self.record(QueueEvent::Restored {
            waiting: snapshot.waiting.len(),
            failed: snapshot.failed.len(),
            finished: snapshot.finished.len(),
        });

        self.waiting = snapshot.waiting.into_iter().map(Job::new).collect();
        self.active.clear();
        self.failed = snapshot.failed.into_iter().map(Job::new).collect();
        self.finished = snapshot.finished.into_iter().map(Job::new).collect();
        self.saturated = false;

        if self.paused {
            Ok(Vec::new())
        } else {
            Ok(self.try_dispatch(false))
        }
    }

    /// Raw concurrency setting; negative in delay mode.
    pub fn concurrency(&self) -> i64 {
        self.concurrency.as_raw()
    }

    pub fn concurrency_mode(&self) -> Concurrency {
        self.concurrency
    }

    /// Switch between limit mode (positive) and delay mode (negative).
    /// Zero is rejected and leaves the setting unchanged.
    pub fn set_concurrency(&mut self, value: i64) -> QueueResult<()> {
        self.concurrency = Concurrency::from_raw(value)?;
        info!(queue = %self.name, concurrency = %self.concurrency, "concurrency changed");
        Ok(())
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    pub fn set_buffer(&mut self, buffer: f64) -> QueueResult<()> {
        self.buffer = validate_buffer(buffer)?;
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            waiting: self.waiting.len(),
            active: self.active.len(),
            failed: self.failed.len(),
            finished: self.finished.len(),
            concurrency: self.concurrency(),
            buffer: self.buffer,
            paused: self.paused,
            started: self.started,
            saturated: self.saturated,
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
