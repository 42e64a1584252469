#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{Done, FnWorker, TaskQueue};
use queue_core::{QueueConfig, QueueEvent};
use serde_json::Value;
use tokio::sync::broadcast::Receiver;

const WAIT: Duration = Duration::from_secs(5);

/// Worker that succeeds with its payload as the only result.
pub fn echo_worker() -> FnWorker<impl Fn(Value, Done) + Send + Sync + 'static> {
    FnWorker::new(|data: Value, done: Done| done.success(vec![data]))
}

/// Echo worker that also records every payload it is invoked with.
pub fn recording_worker() -> (
    FnWorker<impl Fn(Value, Done) + Send + Sync + 'static>,
    Arc<Mutex<Vec<Value>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let worker = FnWorker::new(move |data: Value, done: Done| {
        log.lock().unwrap().push(data.clone());
        done.success(vec![data]);
    });
    (worker, seen)
}

pub async fn spawn_queue(
    worker: impl actors::Worker,
    config: QueueConfig,
) -> Result<TaskQueue, actors::ActorError> {
    let (queue, _handle) = TaskQueue::spawn(worker, config).await?;
    Ok(queue)
}

/// One round trip to the actor. Dispatch attempts posted while handling
/// earlier messages have run once this returns.
pub async fn settle(queue: &TaskQueue) -> Result<(), actors::ActorError> {
    queue.stats().await?;
    Ok(())
}

/// Collect events up to and including the next drain.
pub async fn until_drain(events: &mut Receiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let done = event == QueueEvent::Drain;
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("queue did not drain in time");
    seen
}

pub fn count(events: &[QueueEvent], wanted: &QueueEvent) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}
