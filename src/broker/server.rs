//! Worker server: consume tasks with bounded concurrency.
//!
//! Polls the [`TaskQueue`] on an interval, leases at most as many due
//! tasks as there are free permits, and runs each through the handler
//! registered for its type. On cancellation the server stops claiming and
//! waits until every permit is returned, i.e. all in-flight handlers have
//! finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ConsumerConfig;

use super::queue::{ClaimedTask, TaskQueue};
use super::{TaskError, TaskHandler};

/// Computes the delay before retry number `retried + 1`.
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Default backoff: `retried^4 + 15` seconds.
#[must_use]
pub fn default_retry_delay(retried: u32) -> Duration {
    let secs = u64::from(retried).saturating_pow(4).saturating_add(15);
    Duration::from_secs(secs)
}

/// Routes tasks to handlers by type tag.
#[derive(Default, Clone)]
pub struct ServeMux {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl ServeMux {
    /// Create an empty mux.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for tasks of `type_name`, replacing any previous one.
    pub fn handle(&mut self, type_name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(type_name.into(), handler);
    }

    fn route(&self, type_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(type_name).cloned()
    }
}

/// Pool of concurrent task handlers fed from a [`TaskQueue`].
pub struct WorkerServer {
    queue: TaskQueue,
    mux: ServeMux,
    concurrency: u32,
    poll_interval: Duration,
    task_timeout: Duration,
    retry_delay: RetryDelayFn,
}

impl WorkerServer {
    /// Create a server using the consumer settings.
    #[must_use]
    pub fn new(queue: TaskQueue, mux: ServeMux, config: &ConsumerConfig) -> Self {
        let concurrency = u32::try_from(config.concurrency)
            .unwrap_or(u32::MAX)
            .clamp(1, u32::try_from(Semaphore::MAX_PERMITS).unwrap_or(u32::MAX));
        Self {
            queue,
            mux,
            concurrency,
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
            retry_delay: Arc::new(default_retry_delay),
        }
    }

    /// Replace the backoff function.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: RetryDelayFn) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Spawn the polling loop. The returned handle resolves once the token
    /// is cancelled and in-flight tasks have drained.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let concurrency = self.concurrency;
        tokio::spawn(
            async move {
                self.run(cancel).await;
            }
            .instrument(info_span!("worker_server", concurrency)),
        )
    }

    async fn run(self, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency as usize));
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(concurrency = self.concurrency, "worker server started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("worker server shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            let free = permits.available_permits();
            if free == 0 {
                continue;
            }

            let claimed = match self.queue.claim(free).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!(%err, "failed to claim tasks");
                    continue;
                }
            };

            for claimed in claimed {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let queue = self.queue.clone();
                let handler = self.mux.route(claimed.task.type_name());
                let timeout = self.task_timeout;
                let retry_delay = Arc::clone(&self.retry_delay);
                let span = info_span!(
                    "task",
                    task_id = %claimed.id,
                    task_type = claimed.task.type_name(),
                    retried = claimed.retried
                );
                tokio::spawn(
                    async move {
                        run_task(&queue, handler, claimed, timeout, &retry_delay).await;
                        drop(permit);
                    }
                    .instrument(span),
                );
            }
        }

        if permits.acquire_many(self.concurrency).await.is_ok() {
            info!("worker server drained");
        }
    }
}

/// Execute one leased task and record the verdict.
async fn run_task(
    queue: &TaskQueue,
    handler: Option<Arc<dyn TaskHandler>>,
    claimed: ClaimedTask,
    timeout: Duration,
    retry_delay: &RetryDelayFn,
) {
    let outcome = match handler {
        Some(handler) => {
            match tokio::time::timeout(timeout, handler.process_task(&claimed.task)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TaskError::Retry(format!(
                    "task deadline of {}s exceeded",
                    timeout.as_secs()
                ))),
            }
        }
        None => Err(TaskError::Retry(format!(
            "no handler registered for task type {}",
            claimed.task.type_name()
        ))),
    };

    let recorded = match outcome {
        Ok(()) => {
            debug!("task completed");
            queue.complete(&claimed.id).await
        }
        Err(err @ TaskError::SkipRetry(_)) => {
            warn!(%err, "task failed permanently; moving to dead");
            queue.kill(&claimed.id, &err.to_string()).await
        }
        Err(err) if claimed.retried >= claimed.max_retry => {
            warn!(%err, max_retry = claimed.max_retry, "retry budget exhausted; moving to dead");
            queue.kill(&claimed.id, &err.to_string()).await
        }
        Err(err) => {
            let delay = retry_delay(claimed.retried);
            info!(%err, ?delay, "task will be retried");
            queue.retry(&claimed.id, &err.to_string(), delay).await
        }
    };

    if let Err(err) = recorded {
        error!(%err, "failed to record task outcome");
    }
}
