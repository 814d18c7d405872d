//! Integration tests for the worker server over the `SQLite` task queue.
//!
//! Validates:
//! - In-flight handlers never exceed the configured concurrency
//! - Skip-retry failures go straight to dead
//! - Retry failures consume the budget, then go to dead
//! - Unknown task types and deadline overruns are retried
//! - Cancellation waits for in-flight handlers

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use httpqueue::broker::server::{ServeMux, WorkerServer};
use httpqueue::broker::{EnqueueOptions, Task, TaskError, TaskHandler, TaskState};
use httpqueue::config::ConsumerConfig;

use super::test_helpers::{eventually, stack, Stack};

const TYPE: &str = "test:job";

/// Handler sleeping for `delay`, then answering with `verdict`.
struct Scripted {
    delay: Duration,
    verdict: fn() -> Result<(), TaskError>,
    running: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl Scripted {
    fn new(delay: Duration, verdict: fn() -> Result<(), TaskError>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            verdict,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }
}

impl TaskHandler for Scripted {
    fn process_task<'a>(
        &'a self,
        _task: &'a Task,
    ) -> Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'a>> {
        Box::pin(async move {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            (self.verdict)()
        })
    }
}

fn config(concurrency: usize, task_timeout_seconds: u64) -> ConsumerConfig {
    ConsumerConfig {
        concurrency,
        poll_interval_ms: 10,
        task_timeout_seconds,
        lease_seconds: 30,
    }
}

fn server(stack: &Stack, handler: Arc<Scripted>, config: &ConsumerConfig) -> WorkerServer {
    let mut mux = ServeMux::new();
    mux.handle(TYPE, handler);
    WorkerServer::new(stack.queue.clone(), mux, config)
        .with_retry_delay(Arc::new(|_: u32| Duration::ZERO))
}

async fn enqueue(stack: &Stack, id: &str, type_name: &str, max_retry: u32) {
    stack
        .queue
        .enqueue(
            Task::new(type_name, id.as_bytes().to_vec()),
            EnqueueOptions {
                max_retry,
                task_id: Some(id.to_owned()),
                ..EnqueueOptions::default()
            },
        )
        .await
        .expect("enqueue");
}

async fn state_of(stack: &Stack, id: &str) -> Option<TaskState> {
    stack
        .queue
        .get(id)
        .await
        .expect("get")
        .map(|info| info.state)
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let stack = stack().await;
    for i in 0..8 {
        enqueue(&stack, &format!("job-{i}"), TYPE, 0).await;
    }
    let handler = Scripted::new(Duration::from_millis(50), || Ok(()));
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(3, 5)).spawn(cancel.clone());

    let h = &handler;
    let done = eventually(Duration::from_secs(5), move || async move {
        h.finished.load(Ordering::SeqCst) == 8
    })
    .await;
    cancel.cancel();
    handle.await.expect("join");

    assert!(done, "not every job finished");
    assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    assert!(handler.peak.load(Ordering::SeqCst) >= 2);
    assert_eq!(stack.queue.count(TaskState::Active).await.expect("count"), 0);
}

#[tokio::test]
async fn skip_retry_goes_to_dead_at_once() {
    let stack = stack().await;
    enqueue(&stack, "doomed", TYPE, 5).await;
    let handler = Scripted::new(Duration::ZERO, || {
        Err(TaskError::SkipRetry("bad input".into()))
    });
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(2, 5)).spawn(cancel.clone());

    let s = &stack;
    let dead = eventually(Duration::from_secs(5), move || async move {
        state_of(s, "doomed").await == Some(TaskState::Dead)
    })
    .await;
    cancel.cancel();
    handle.await.expect("join");

    assert!(dead);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
    let info = stack.queue.get("doomed").await.expect("get").expect("kept");
    assert_eq!(info.retried, 0);
    assert_eq!(info.last_error.as_deref(), Some("bad input: skip retry"));
}

#[tokio::test]
async fn retry_budget_is_honoured() {
    let stack = stack().await;
    enqueue(&stack, "flaky", TYPE, 3).await;
    let handler = Scripted::new(Duration::ZERO, || Err(TaskError::Retry("try later".into())));
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(2, 5)).spawn(cancel.clone());

    let s = &stack;
    let dead = eventually(Duration::from_secs(5), move || async move {
        state_of(s, "flaky").await == Some(TaskState::Dead)
    })
    .await;
    cancel.cancel();
    handle.await.expect("join");

    assert!(dead);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 4);
    let info = stack.queue.get("flaky").await.expect("get").expect("kept");
    assert_eq!(info.retried, 3);
}

#[tokio::test]
async fn unknown_type_is_retried_until_dead() {
    let stack = stack().await;
    enqueue(&stack, "orphan", "other:job", 1).await;
    let handler = Scripted::new(Duration::ZERO, || Ok(()));
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(2, 5)).spawn(cancel.clone());

    let s = &stack;
    let dead = eventually(Duration::from_secs(5), move || async move {
        state_of(s, "orphan").await == Some(TaskState::Dead)
    })
    .await;
    cancel.cancel();
    handle.await.expect("join");

    assert!(dead);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 0);
    let info = stack.queue.get("orphan").await.expect("get").expect("kept");
    assert_eq!(info.retried, 1);
    assert!(info
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("no handler")));
}

#[tokio::test]
async fn deadline_overrun_is_retried() {
    let stack = stack().await;
    enqueue(&stack, "slow", TYPE, 0).await;
    let handler = Scripted::new(Duration::from_secs(3), || Ok(()));
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(1, 1)).spawn(cancel.clone());

    let s = &stack;
    let dead = eventually(Duration::from_secs(5), move || async move {
        state_of(s, "slow").await == Some(TaskState::Dead)
    })
    .await;
    cancel.cancel();
    handle.await.expect("join");

    assert!(dead);
    assert_eq!(handler.finished.load(Ordering::SeqCst), 0);
    let info = stack.queue.get("slow").await.expect("get").expect("kept");
    assert!(info
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("deadline")));
}

#[tokio::test]
async fn shutdown_drains_in_flight_handlers() {
    let stack = stack().await;
    enqueue(&stack, "long", TYPE, 0).await;
    let handler = Scripted::new(Duration::from_millis(300), || Ok(()));
    let cancel = CancellationToken::new();
    let handle = server(&stack, Arc::clone(&handler), &config(2, 5)).spawn(cancel.clone());

    let h = &handler;
    let started = eventually(Duration::from_secs(5), move || async move {
        h.running.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(started);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server stops")
        .expect("join");

    assert_eq!(handler.finished.load(Ordering::SeqCst), 1);
}
