//! Client handle for a running queue actor.

use std::str::FromStr;
use std::sync::Arc;

use queue_core::{
    HookFn, HookKind, Job, JobCallback, JobFailure, JobId, JobResult, JobStatus, QueueConfig,
    QueueEvent, QueueStats, Scheduler, Snapshot, job_callback,
};
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorRef, RpcReplyPort};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::messages::{ActorError, ActorResult, QueueMessage};
use crate::persistence::StatePersistence;
use crate::queue_actor::{QueueActor, QueueActorState};
use crate::worker::Worker;

const EVENT_CAPACITY: usize = 1024;

/// Handle to a queue actor.
///
/// Cheap to clone. Every method is a message to the actor, so calls made from
/// one task are applied in order. Hooks run inside the actor: they must not
/// block, and must only use the non-async methods (`push`, `unshift`,
/// `pause`, `resume`) of a handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    actor: ActorRef<QueueMessage>,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueue {
    /// Validate `config` and start a queue actor running `worker`.
    ///
    /// The actor is registered under `config.name` when one is set.
    pub async fn spawn(
        worker: impl Worker,
        config: QueueConfig,
    ) -> ActorResult<(Self, JoinHandle<()>)> {
        let scheduler = Scheduler::new(&config)?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let state =
            QueueActorState::new(scheduler, Arc::new(worker)).with_event_tx(event_tx.clone());

        let (actor, handle) = Actor::spawn(config.name.clone(), QueueActor, state)
            .await
            .map_err(|e| ActorError::Spawn(e.to_string()))?;

        Ok((
            Self {
                actor,
                events: event_tx,
            },
            handle,
        ))
    }

    /// The underlying actor reference.
    pub fn actor(&self) -> &ActorRef<QueueMessage> {
        &self.actor
    }

    /// Receive every [`QueueEvent`] emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn ask<T>(&self, build: impl FnOnce(RpcReplyPort<T>) -> QueueMessage) -> ActorResult<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.cast(build(tx.into()))?;
        rx.await.map_err(|_| ActorError::Stopped)
    }

    fn cast(&self, message: QueueMessage) -> ActorResult<()> {
        self.actor
            .send_message(message)
            .map_err(|_| ActorError::Stopped)
    }

    /// Build the jobs here and post them without waiting, so a run of
    /// `push`/`unshift` calls lands in the mailbox ahead of any dispatch.
    fn enqueue(
        &self,
        data: Value,
        callback: Option<JobCallback>,
        priority: bool,
    ) -> ActorResult<Vec<JobId>> {
        let (jobs, result) = match Job::batch(data, callback) {
            Ok(jobs) => {
                let ids: Vec<JobId> = jobs.iter().map(|job| job.id).collect();
                (jobs, Ok(ids))
            }
            // A rejected call still marks the queue started.
            Err(e) => (Vec::new(), Err(ActorError::from(e))),
        };
        self.cast(QueueMessage::Enqueue { jobs, priority })?;
        result
    }

    /// Append a payload to the tail of the queue. An array payload adds one
    /// job per element, in order.
    pub fn push(&self, data: Value) -> ActorResult<Vec<JobId>> {
        self.enqueue(data, None, false)
    }

    /// Like [`TaskQueue::push`], with a callback for each job's terminal result.
    pub fn push_with(
        &self,
        data: Value,
        callback: impl Fn(&Value, JobResult<'_>) + Send + Sync + 'static,
    ) -> ActorResult<Vec<JobId>> {
        self.enqueue(data, Some(job_callback(callback)), false)
    }

    /// Insert a payload at the head of the queue. Array elements are
    /// inserted one by one, so they end up in reverse order.
    pub fn unshift(&self, data: Value) -> ActorResult<Vec<JobId>> {
        self.enqueue(data, None, true)
    }

    pub fn unshift_with(
        &self,
        data: Value,
        callback: impl Fn(&Value, JobResult<'_>) + Send + Sync + 'static,
    ) -> ActorResult<Vec<JobId>> {
        self.enqueue(data, Some(job_callback(callback)), true)
    }

    /// Stop dispatching. Active workers keep running.
    pub fn pause(&self) -> ActorResult<()> {
        self.cast(QueueMessage::Pause)
    }

    /// Resume dispatching and fill free slots.
    pub fn resume(&self) -> ActorResult<()> {
        self.cast(QueueMessage::Resume)
    }

    /// Drop every waiting job and silence the drain hook. Returns how many
    /// jobs were dropped.
    pub async fn kill(&self) -> ActorResult<usize> {
        self.ask(|reply| QueueMessage::Kill { reply }).await
    }

    /// Remove waiting jobs whose payload equals `data`.
    pub async fn remove(&self, data: Value) -> ActorResult<usize> {
        self.ask(|reply| QueueMessage::Remove { data, reply }).await
    }

    pub async fn status(&self, data: Value) -> ActorResult<JobStatus> {
        self.ask(|reply| QueueMessage::Status { data, reply }).await
    }

    /// Payloads currently in one collection.
    pub async fn list(&self, status: JobStatus) -> ActorResult<Vec<Value>> {
        self.ask(|reply| QueueMessage::ListJobs { status, reply })
            .await
    }

    pub async fn stats(&self) -> ActorResult<QueueStats> {
        self.ask(|reply| QueueMessage::GetStats { reply }).await
    }

    /// Number of waiting jobs.
    pub async fn length(&self) -> ActorResult<usize> {
        Ok(self.stats().await?.waiting)
    }

    /// Number of active jobs.
    pub async fn running(&self) -> ActorResult<usize> {
        Ok(self.stats().await?.active)
    }

    pub async fn idle(&self) -> ActorResult<bool> {
        Ok(self.stats().await?.pending() == 0)
    }

    pub async fn snapshot(&self) -> ActorResult<Snapshot> {
        self.ask(|reply| QueueMessage::Snapshot { reply }).await
    }

    /// Load a snapshot. Fails once the queue has held any work.
    pub async fn restore(&self, snapshot: Snapshot) -> ActorResult<()> {
        self.ask(|reply| QueueMessage::Restore { snapshot, reply })
            .await??;
        Ok(())
    }

    /// Persist the current snapshot under `name`.
    pub async fn save_to(&self, persistence: &StatePersistence, name: &str) -> ActorResult<()> {
        let snapshot = self.snapshot().await?;
        persistence.save_snapshot(name, &snapshot).await?;
        tracing::info!("Saved queue snapshot {} ({} jobs)", name, snapshot.len());
        Ok(())
    }

    /// Restore from the snapshot stored under `name`. Returns `false` when
    /// nothing was stored.
    pub async fn restore_from(
        &self,
        persistence: &StatePersistence,
        name: &str,
    ) -> ActorResult<bool> {
        let Some(snapshot) = persistence.load_snapshot(name).await? else {
            return Ok(false);
        };
        self.restore(snapshot).await?;
        tracing::info!("Restored queue snapshot {}", name);
        Ok(true)
    }

    /// Raw concurrency setting; negative in delay mode.
    pub async fn concurrency(&self) -> ActorResult<i64> {
        Ok(self.stats().await?.concurrency)
    }

    pub async fn set_concurrency(&self, value: i64) -> ActorResult<()> {
        self.ask(|reply| QueueMessage::SetConcurrency { value, reply })
            .await??;
        Ok(())
    }

    pub async fn buffer(&self) -> ActorResult<f64> {
        Ok(self.stats().await?.buffer)
    }

    pub async fn set_buffer(&self, value: f64) -> ActorResult<()> {
        self.ask(|reply| QueueMessage::SetBuffer { value, reply })
            .await??;
        Ok(())
    }

    async fn install(&self, kind: HookKind, hook: Option<HookFn>) -> ActorResult<()> {
        self.ask(|reply| QueueMessage::SetHook { kind, hook, reply })
            .await??;
        Ok(())
    }

    /// Install a hook by name. `None` restores the no-op default.
    pub async fn set_hook(&self, name: &str, hook: Option<HookFn>) -> ActorResult<()> {
        let kind = HookKind::from_str(name)?;
        self.install(kind, hook).await
    }

    pub async fn clear_hook(&self, kind: HookKind) -> ActorResult<()> {
        self.install(kind, None).await
    }

    pub async fn on_drain(&self, f: impl FnMut() + Send + 'static) -> ActorResult<()> {
        self.install(HookKind::Drain, Some(HookFn::signal(f))).await
    }

    pub async fn on_empty(&self, f: impl FnMut() + Send + 'static) -> ActorResult<()> {
        self.install(HookKind::Empty, Some(HookFn::signal(f))).await
    }

    pub async fn on_saturated(&self, f: impl FnMut() + Send + 'static) -> ActorResult<()> {
        self.install(HookKind::Saturated, Some(HookFn::signal(f)))
            .await
    }

    pub async fn on_unsaturated(&self, f: impl FnMut() + Send + 'static) -> ActorResult<()> {
        self.install(HookKind::Unsaturated, Some(HookFn::signal(f)))
            .await
    }

    pub async fn on_success(
        &self,
        f: impl FnMut(&Value, &[Value]) + Send + 'static,
    ) -> ActorResult<()> {
        self.install(HookKind::Success, Some(HookFn::results(f)))
            .await
    }

    pub async fn on_retry(
        &self,
        f: impl FnMut(&Value, &[Value]) + Send + 'static,
    ) -> ActorResult<()> {
        self.install(HookKind::Retry, Some(HookFn::results(f))).await
    }

    pub async fn on_error(
        &self,
        f: impl FnMut(&Value, &JobFailure) + Send + 'static,
    ) -> ActorResult<()> {
        self.install(HookKind::Error, Some(HookFn::error(f))).await
    }

    /// Stop the actor. Waiting and active jobs are abandoned.
    pub fn shutdown(&self) -> ActorResult<()> {
        self.cast(QueueMessage::Shutdown)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("actor", &self.actor.get_id())
            .finish()
    }
}
