//! Queue actor that owns one scheduler and runs its workers.

use std::sync::Arc;

use queue_core::{Dispatch, QueueEvent, Scheduler};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::QueueMessage;
use crate::worker::{Done, Worker};

/// State for the queue actor.
pub struct QueueActorState {
    /// The scheduler state machine.
    scheduler: Scheduler,
    /// Worker invoked for every dispatched job.
    worker: Arc<dyn Worker>,
    /// Event broadcaster.
    event_tx: Option<broadcast::Sender<QueueEvent>>,
}

impl QueueActorState {
    /// Create a new queue actor state.
    pub fn new(scheduler: Scheduler, worker: Arc<dyn Worker>) -> Self {
        Self {
            scheduler: scheduler.with_event_log(),
            worker,
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<QueueEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Forward everything the scheduler recorded to subscribers.
    fn broadcast(&mut self) {
        let events = self.scheduler.take_events();
        if let Some(ref tx) = self.event_tx {
            for event in events {
                tracing::trace!(
                    job_id = ?event.job_id(),
                    "{}: {}",
                    self.scheduler.name(),
                    event.description()
                );
                let _ = tx.send(event);
            }
        }
    }
}

/// Defer each worker invocation: zero delays go through the mailbox, longer
/// ones through a timer that posts the same message.
fn schedule(myself: &ActorRef<QueueMessage>, dispatches: Vec<Dispatch>) {
    for Dispatch {
        ticket,
        data,
        delay,
    } in dispatches
    {
        if delay.is_zero() {
            if myself
                .send_message(QueueMessage::Run { ticket, data })
                .is_err()
            {
                tracing::warn!("Queue stopped before job {} could run", ticket);
            }
        } else {
            let queue = myself.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if queue.send_message(QueueMessage::Run { ticket, data }).is_err() {
                    tracing::warn!("Queue stopped before delayed job {} could run", ticket);
                }
            });
        }
    }
}

fn request_dispatch(myself: &ActorRef<QueueMessage>) {
    if myself.send_message(QueueMessage::Dispatch).is_err() {
        tracing::warn!("Queue stopped before dispatch attempt");
    }
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting queue actor: {} ({})",
            args.scheduler.name(),
            args.scheduler.concurrency_mode()
        );
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { jobs, priority } => {
                for _ in state.scheduler.insert(jobs, priority) {
                    request_dispatch(&myself);
                }
            }

            QueueMessage::Dispatch => {
                let dispatches = state.scheduler.try_dispatch(false);
                schedule(&myself, dispatches);
            }

            QueueMessage::Run { ticket, data } => {
                if state.scheduler.is_dispatched(ticket) {
                    state.worker.run(data, Done::new(ticket, myself.clone()));
                } else {
                    tracing::warn!("Job {} is no longer active, skipping run", ticket);
                }
            }

            QueueMessage::Complete { ticket, outcome } => {
                match state.scheduler.complete(ticket, outcome) {
                    Ok(dispatches) => schedule(&myself, dispatches),
                    Err(e) => {
                        tracing::error!(
                            "Stopping queue {}: worker bug: {}",
                            state.scheduler.name(),
                            e
                        );
                        state.broadcast();
                        return Err(e.into());
                    }
                }
            }

            QueueMessage::Pause => {
                state.scheduler.pause();
            }

            QueueMessage::Resume => {
                let dispatches = state.scheduler.resume();
                schedule(&myself, dispatches);
            }

            QueueMessage::Kill { reply } => {
                let _ = reply.send(state.scheduler.kill());
            }

            QueueMessage::Remove { data, reply } => {
                let _ = reply.send(state.scheduler.remove(&data));
            }

            QueueMessage::Status { data, reply } => {
                let _ = reply.send(state.scheduler.status(&data));
            }

            QueueMessage::ListJobs { status, reply } => {
                let _ = reply.send(state.scheduler.payloads(status));
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.scheduler.stats());
            }

            QueueMessage::Snapshot { reply } => {
                let _ = reply.send(state.scheduler.snapshot());
            }

            QueueMessage::Restore { snapshot, reply } => {
                let result = state
                    .scheduler
                    .restore(snapshot)
                    .map(|dispatches| schedule(&myself, dispatches));
                let _ = reply.send(result);
            }

            QueueMessage::SetConcurrency { value, reply } => {
                let result = state.scheduler.set_concurrency(value);
                if result.is_ok() {
                    // A raised limit may leave free slots.
                    request_dispatch(&myself);
                }
                let _ = reply.send(result);
            }

            QueueMessage::SetBuffer { value, reply } => {
                let _ = reply.send(state.scheduler.set_buffer(value));
            }

            QueueMessage::SetHook { kind, hook, reply } => {
                let _ = reply.send(state.scheduler.hooks_mut().set(kind, hook));
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.scheduler.name());
                myself.stop(None);
            }
        }

        state.broadcast();
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let stats = state.scheduler.stats();
        tracing::info!(
            "Queue actor stopped: {} ({} waiting, {} active abandoned)",
            state.scheduler.name(),
            stats.waiting,
            stats.active
        );
        Ok(())
    }
}
