#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actors::{
    ABANDONED, ActorError, AsyncWorker, Done, FnWorker, QueueMessage, StatePersistence,
    TaskQueue, WorkFuture, async_worker,
};
use queue_core::{
    HookFn, JobId, JobStatus, Outcome, QueueConfig, QueueError, QueueEvent, Snapshot, Ticket,
};
use serde_json::{Value, json};

use common::{count, echo_worker, recording_worker, settle, spawn_queue, until_drain};

#[tokio::test]
async fn test_push_runs_jobs_in_order() -> Result<(), Box<dyn Error>> {
    let (worker, seen) = recording_worker();
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    let ids = queue.push(json!(["a", "b", "c"]))?;
    assert_eq!(ids.len(), 3);

    let trace = until_drain(&mut events).await;
    assert_eq!(count(&trace, &QueueEvent::Drain), 1);
    assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!("b"), json!("c")]);
    assert_eq!(
        queue.list(JobStatus::Finished).await?,
        vec![json!("a"), json!("b"), json!("c")]
    );

    let stats = queue.stats().await?;
    assert_eq!(stats.finished, 3);
    assert_eq!(stats.pending(), 0);
    assert!(queue.idle().await?);
    Ok(())
}

#[tokio::test]
async fn test_unshift_reverses_array_elements() -> Result<(), Box<dyn Error>> {
    let (worker, seen) = recording_worker();
    let queue = spawn_queue(worker, QueueConfig::new(1).paused()).await?;
    let mut events = queue.subscribe();

    queue.push(json!("tail"))?;
    queue.unshift(json!([1, 2, 3]))?;
    assert_eq!(queue.length().await?, 4);

    queue.resume()?;
    until_drain(&mut events).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!(3), json!(2), json!(1), json!("tail")]
    );
    Ok(())
}

#[tokio::test]
async fn test_back_to_back_calls_land_before_dispatch() -> Result<(), Box<dyn Error>> {
    let (worker, seen) = recording_worker();
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    queue.push(json!("a"))?;
    queue.unshift(json!("b"))?;
    until_drain(&mut events).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("b"), json!("a")]);

    seen.lock().unwrap().clear();
    for n in 1..=4 {
        queue.unshift(json!(n))?;
    }
    until_drain(&mut events).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!(4), json!(3), json!(2), json!(1)]
    );
    Ok(())
}

#[tokio::test]
async fn test_callback_and_success_hook() -> Result<(), Box<dyn Error>> {
    let worker = FnWorker::new(|data: Value, done: Done| {
        let doubled = data.as_i64().unwrap_or_default() * 2;
        done.success(vec![json!(doubled)]);
    });
    let queue = spawn_queue(worker, QueueConfig::new(2)).await?;
    let mut events = queue.subscribe();

    let order = Arc::new(Mutex::new(Vec::new()));
    let hook_order = order.clone();
    queue
        .on_success(move |data, results| {
            hook_order
                .lock()
                .unwrap()
                .push(format!("hook {} -> {}", data, results[0]));
        })
        .await?;

    let callback_order = order.clone();
    queue
        .push_with(json!([1, 2]), move |data, result| {
            let results = result.unwrap();
            callback_order
                .lock()
                .unwrap()
                .push(format!("callback {} -> {}", data, results[0]));
        })?;

    until_drain(&mut events).await;
    assert_eq!(
        *order.lock().unwrap(),
        vec![
            "callback 1 -> 2",
            "hook 1 -> 2",
            "callback 2 -> 4",
            "hook 2 -> 4",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_failures_land_in_failed() -> Result<(), Box<dyn Error>> {
    let worker = FnWorker::new(|data: Value, done: Done| {
        if data == json!("bad") {
            done.fail("boom");
        } else {
            done.success(Vec::new());
        }
    });
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let hook_errors = errors.clone();
    queue
        .on_error(move |data, failure| {
            hook_errors
                .lock()
                .unwrap()
                .push((data.clone(), failure.error.clone()));
        })
        .await?;

    let callback_failures = Arc::new(AtomicUsize::new(0));
    let failures = callback_failures.clone();
    queue
        .push_with(json!(["good", "bad"]), move |_, result| {
            if result.is_err() {
                failures.fetch_add(1, Ordering::SeqCst);
            }
        })?;

    until_drain(&mut events).await;
    assert_eq!(
        *errors.lock().unwrap(),
        vec![(json!("bad"), "boom".to_string())]
    );
    assert_eq!(callback_failures.load(Ordering::SeqCst), 1);
    assert_eq!(queue.status(json!("bad")).await?, JobStatus::Failed);
    assert_eq!(queue.status(json!("good")).await?, JobStatus::Finished);
    assert_eq!(queue.list(JobStatus::Failed).await?, vec![json!("bad")]);
    Ok(())
}

#[tokio::test]
async fn test_retry_requeues_until_success() -> Result<(), Box<dyn Error>> {
    let attempted = Arc::new(Mutex::new(HashSet::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let worker = {
        let attempted = attempted.clone();
        let calls = calls.clone();
        FnWorker::new(move |data: Value, done: Done| {
            calls.fetch_add(1, Ordering::SeqCst);
            let first = attempted.lock().unwrap().insert(data.to_string());
            if first {
                done.retry(false);
            } else {
                done.success(vec![data]);
            }
        })
    };
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    let retries = Arc::new(AtomicUsize::new(0));
    let hook_retries = retries.clone();
    queue
        .on_retry(move |_, _| {
            hook_retries.fetch_add(1, Ordering::SeqCst);
        })
        .await?;

    let callbacks = Arc::new(AtomicUsize::new(0));
    let counted = callbacks.clone();
    queue
        .push_with(json!(["x", "y"]), move |_, _| {
            counted.fetch_add(1, Ordering::SeqCst);
        })?;

    until_drain(&mut events).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
    // Callbacks only see terminal results.
    assert_eq!(callbacks.load(Ordering::SeqCst), 2);
    assert_eq!(queue.stats().await?.finished, 2);
    Ok(())
}

#[tokio::test]
async fn test_async_worker_respects_limit() -> Result<(), Box<dyn Error>> {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let worker = {
        let current = current.clone();
        let peak = peak.clone();
        AsyncWorker::new(move |data: Value| {
            let current = current.clone();
            let peak = peak.clone();
            Box::pin(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Outcome::success(vec![data])
            }) as WorkFuture
        })
    };
    let queue = spawn_queue(worker, QueueConfig::new(2)).await?;
    let mut events = queue.subscribe();

    let saturated = Arc::new(AtomicUsize::new(0));
    let hook_saturated = saturated.clone();
    queue
        .on_saturated(move || {
            hook_saturated.fetch_add(1, Ordering::SeqCst);
        })
        .await?;

    queue.push(json!([1, 2, 3, 4, 5, 6]))?;
    let trace = until_drain(&mut events).await;

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(saturated.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        count(&trace, &QueueEvent::Saturated),
        saturated.load(Ordering::SeqCst)
    );
    assert_eq!(queue.stats().await?.finished, 6);
    Ok(())
}

#[tokio::test]
async fn test_async_worker_macro() -> Result<(), Box<dyn Error>> {
    let worker = async_worker!(|data| {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if data.is_string() {
            Outcome::success(vec![data])
        } else {
            Outcome::failure("expected a string")
        }
    });
    let queue = spawn_queue(worker, QueueConfig::new(4)).await?;
    let mut events = queue.subscribe();

    queue.push(json!(["ok", 7]))?;
    until_drain(&mut events).await;

    assert_eq!(queue.list(JobStatus::Finished).await?, vec![json!("ok")]);
    assert_eq!(queue.list(JobStatus::Failed).await?, vec![json!(7)]);
    Ok(())
}

#[tokio::test]
async fn test_panicking_worker_releases_its_slot() -> Result<(), Box<dyn Error>> {
    let worker = AsyncWorker::new(|data: Value| {
        Box::pin(async move {
            if data == json!("explode") {
                panic!("worker blew up");
            }
            Outcome::success(vec![data])
        }) as WorkFuture
    });
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let hook_errors = errors.clone();
    queue
        .on_error(move |data, failure| {
            hook_errors
                .lock()
                .unwrap()
                .push((data.clone(), failure.error.clone()));
        })
        .await?;

    queue.push(json!(["explode", "after"]))?;
    until_drain(&mut events).await;

    assert_eq!(
        *errors.lock().unwrap(),
        vec![(json!("explode"), ABANDONED.to_string())]
    );
    assert_eq!(queue.status(json!("after")).await?, JobStatus::Finished);
    assert_eq!(queue.running().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_dropped_done_fails_the_job() -> Result<(), Box<dyn Error>> {
    let worker = FnWorker::new(|data: Value, done: Done| {
        if data.is_number() {
            drop(done);
        } else {
            done.success(Vec::new());
        }
    });
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    queue.push(json!([1, "two"]))?;
    until_drain(&mut events).await;
    assert_eq!(queue.list(JobStatus::Failed).await?, vec![json!(1)]);
    assert_eq!(queue.list(JobStatus::Finished).await?, vec![json!("two")]);
    Ok(())
}

#[tokio::test]
async fn test_delay_mode_spaces_jobs() -> Result<(), Box<dyn Error>> {
    let started = Arc::new(Mutex::new(Vec::new()));
    let worker = {
        let started = started.clone();
        FnWorker::new(move |data: Value, done: Done| {
            started.lock().unwrap().push(Instant::now());
            done.success(vec![data]);
        })
    };
    let queue = spawn_queue(worker, QueueConfig::new(-40)).await?;
    let mut events = queue.subscribe();
    assert_eq!(queue.concurrency().await?, -40);

    let pushed = Instant::now();
    queue.push(json!(["a", "b", "c"]))?;
    let trace = until_drain(&mut events).await;

    let started = started.lock().unwrap();
    assert_eq!(started.len(), 3);
    assert!(started[0] - pushed < Duration::from_millis(40));
    for pair in started.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(35));
    }

    let delays: Vec<u64> = trace
        .iter()
        .filter_map(|event| match event {
            QueueEvent::Dispatched { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![0, 40, 40]);
    Ok(())
}

#[tokio::test]
async fn test_pause_remove_and_status() -> Result<(), Box<dyn Error>> {
    let (worker, seen) = recording_worker();
    let queue = spawn_queue(worker, QueueConfig::new(2).paused()).await?;
    let mut events = queue.subscribe();

    queue.push(json!(["a", "b", "a", "c"]))?;
    assert_eq!(queue.status(json!("a")).await?, JobStatus::Waiting);
    assert_eq!(queue.running().await?, 0);

    assert_eq!(queue.remove(json!("a")).await?, 2);
    assert_eq!(queue.remove(json!("zzz")).await?, 0);
    assert_eq!(queue.length().await?, 2);
    assert_eq!(queue.status(json!("a")).await?, JobStatus::Missing);

    queue.resume()?;
    until_drain(&mut events).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!("b"), json!("c")]);
    assert_eq!(queue.status(json!("b")).await?, JobStatus::Finished);
    Ok(())
}

#[tokio::test]
async fn test_kill_discards_waiting() -> Result<(), Box<dyn Error>> {
    let queue = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;

    let drains = Arc::new(AtomicUsize::new(0));
    let hook_drains = drains.clone();
    queue
        .on_drain(move || {
            hook_drains.fetch_add(1, Ordering::SeqCst);
        })
        .await?;

    queue.push(json!([1, 2, 3]))?;
    assert_eq!(queue.kill().await?, 3);
    assert_eq!(queue.length().await?, 0);

    // The hook stays silent, the event stream still reports the drain.
    let mut events = queue.subscribe();
    queue.resume()?;
    until_drain(&mut events).await;
    assert_eq!(drains.load(Ordering::SeqCst), 0);
    assert!(queue.idle().await?);
    Ok(())
}

#[tokio::test]
async fn test_set_concurrency_fills_new_slots() -> Result<(), Box<dyn Error>> {
    let held = Arc::new(Mutex::new(Vec::new()));
    let worker = {
        let held = held.clone();
        FnWorker::new(move |_: Value, done: Done| held.lock().unwrap().push(done))
    };
    let queue = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = queue.subscribe();

    queue.push(json!(["a", "b", "c"]))?;
    settle(&queue).await?;
    assert_eq!(queue.running().await?, 1);
    assert_eq!(queue.length().await?, 2);

    queue.set_concurrency(3).await?;
    assert_eq!(queue.running().await?, 3);

    let err = queue.set_concurrency(0).await.unwrap_err();
    assert!(matches!(
        err,
        ActorError::Queue(QueueError::Configuration(_))
    ));
    assert_eq!(queue.concurrency().await?, 3);

    // Wait for every Run to reach the worker before releasing the jobs.
    while held.lock().unwrap().len() < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let dones: Vec<Done> = held.lock().unwrap().drain(..).collect();
    for done in dones {
        done.success(Vec::new());
    }
    until_drain(&mut events).await;
    assert_eq!(queue.stats().await?.finished, 3);
    Ok(())
}

#[tokio::test]
async fn test_snapshot_moves_work_between_queues() -> Result<(), Box<dyn Error>> {
    let source = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;
    source.push(json!(["a", {"id": 2}]))?;
    let snapshot = source.snapshot().await?;
    assert_eq!(snapshot.waiting, vec![json!("a"), json!({"id": 2})]);

    let (worker, seen) = recording_worker();
    let target = spawn_queue(worker, QueueConfig::new(1)).await?;
    let mut events = target.subscribe();
    target
        .restore(Snapshot {
            finished: vec![json!("old")],
            ..snapshot
        })
        .await?;
    until_drain(&mut events).await;

    assert_eq!(*seen.lock().unwrap(), vec![json!("a"), json!({"id": 2})]);
    assert_eq!(target.stats().await?.finished, 3);

    let err = target.restore(Snapshot::default()).await.unwrap_err();
    assert!(matches!(err, ActorError::Queue(QueueError::AlreadyStarted)));
    Ok(())
}

#[tokio::test]
async fn test_restore_after_push_is_rejected() -> Result<(), Box<dyn Error>> {
    let queue = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;
    queue.push(json!("x"))?;
    let err = queue.restore(Snapshot::default()).await.unwrap_err();
    assert!(matches!(err, ActorError::Queue(QueueError::AlreadyStarted)));
    Ok(())
}

#[tokio::test]
async fn test_persistence_round_trip() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let persistence = StatePersistence::new(dir.path());
    persistence.init().await?;

    let source = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;
    source.push(json!([1, 2]))?;
    source.save_to(&persistence, "numbers").await?;
    assert_eq!(persistence.list().await?, vec!["numbers"]);

    let target = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;
    assert!(!target.restore_from(&persistence, "missing").await?);
    assert!(target.restore_from(&persistence, "numbers").await?);
    assert_eq!(target.list(JobStatus::Waiting).await?, vec![json!(1), json!(2)]);
    Ok(())
}

#[tokio::test]
async fn test_hook_registration_by_name() -> Result<(), Box<dyn Error>> {
    let queue = spawn_queue(echo_worker(), QueueConfig::new(1)).await?;

    let err = queue
        .set_hook("finish", Some(HookFn::signal(|| {})))
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::Queue(QueueError::UnknownHook(_))));

    let err = queue
        .set_hook("drain", Some(HookFn::results(|_, _| {})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ActorError::Queue(QueueError::TypeMismatch { .. })
    ));

    let empties = Arc::new(AtomicUsize::new(0));
    let hook_empties = empties.clone();
    queue
        .set_hook(
            "empty",
            Some(HookFn::signal(move || {
                hook_empties.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await?;
    let mut events = queue.subscribe();
    queue.push(json!("only"))?;
    until_drain(&mut events).await;
    assert_eq!(empties.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_is_rejected() -> Result<(), Box<dyn Error>> {
    let err = TaskQueue::spawn(echo_worker(), QueueConfig::new(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ActorError::Queue(QueueError::Configuration(_))
    ));

    let queue = spawn_queue(echo_worker(), QueueConfig::new(1).paused()).await?;
    let err = queue.push(json!(["a", null])).unwrap_err();
    assert!(matches!(
        err,
        ActorError::Queue(QueueError::InvalidJobKind(_))
    ));
    assert_eq!(queue.length().await?, 0);

    let err = queue.set_buffer(-1.0).await.unwrap_err();
    assert!(matches!(
        err,
        ActorError::Queue(QueueError::Configuration(_))
    ));
    queue.set_buffer(0.5).await?;
    assert_eq!(queue.buffer().await?, 0.5);
    Ok(())
}

#[tokio::test]
async fn test_stale_completion_stops_the_queue() -> Result<(), Box<dyn Error>> {
    let (queue, handle) = TaskQueue::spawn(echo_worker(), QueueConfig::new(1)).await?;

    let ticket = Ticket {
        job_id: JobId::new(),
        attempt: 1,
    };
    let sent = queue.actor().send_message(QueueMessage::Complete {
        ticket,
        outcome: Outcome::success(Vec::new()),
    });
    assert!(sent.is_ok());
    handle.await?;

    let err = queue.stats().await.unwrap_err();
    assert!(matches!(err, ActorError::Stopped));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_the_actor() -> Result<(), Box<dyn Error>> {
    let (queue, handle) = TaskQueue::spawn(echo_worker(), QueueConfig::new(1)).await?;
    queue.shutdown()?;
    handle.await?;
    assert!(matches!(queue.push(json!(1)), Err(ActorError::Stopped)));
    Ok(())
}
