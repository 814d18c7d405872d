//! Webhook processor: the per-task delivery state machine.
//!
//! decode -> lookup -> deliver -> archive. Terminal failures (malformed
//! payload, unknown timer, permanent delivery error) skip retry; lookup
//! failures and retryable delivery errors go back to the broker. An
//! archived timer completes as a no-op, which makes redelivery safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::{Task, TaskError, TaskHandler};
use crate::metrics::{MetricsSink, CONSUMER_OUTCOMES};
use crate::models::TimerState;
use crate::timer::{TimerService, WebhookShooter};

use super::task;

/// Handles `timer:webhook` tasks.
#[derive(Clone)]
pub struct WebhookProcessor {
    service: TimerService,
    shooter: Arc<dyn WebhookShooter>,
    metrics: Arc<dyn MetricsSink>,
}

impl WebhookProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        service: TimerService,
        shooter: Arc<dyn WebhookShooter>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service,
            shooter,
            metrics,
        }
    }

    fn record(&self, outcome: &str) {
        self.metrics
            .increment_counter(CONSUMER_OUTCOMES, &[("outcome", outcome)]);
    }

    /// Run the state machine for one task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::SkipRetry`] for terminal failures and
    /// [`TaskError::Retry`] for transient ones.
    pub async fn process(&self, task: &Task) -> Result<(), TaskError> {
        let payload = task::decode_payload(task.payload()).map_err(|err| {
            self.record("malformed");
            TaskError::SkipRetry(format!("malformed payload: {err}"))
        })?;
        let timer_id = payload.timer_id.as_str();

        let timer = match self.service.get_timer(timer_id).await {
            Ok(TimerState::Active(timer)) => timer,
            Ok(TimerState::Archived) => {
                self.record("archived_noop");
                debug!(timer_id, "timer already archived; nothing to do");
                return Ok(());
            }
            Ok(TimerState::NotFound) => {
                self.record("not_found");
                return Err(TaskError::SkipRetry(format!(
                    "timer {timer_id} does not exist"
                )));
            }
            Err(err) => {
                self.record("lookup_failed");
                return Err(TaskError::Retry(format!(
                    "failed to find timer {timer_id} in storage: {err}"
                )));
            }
        };

        debug!(timer_id, url = %timer.url(), "making webhook call");
        if let Err(err) = self.shooter.shoot(&timer).await {
            if err.is_retryable() {
                self.record("retryable");
                return Err(TaskError::Retry(format!(
                    "temporarily failed to call the timer url: {err}"
                )));
            }
            self.record("permanent");
            warn!(timer_id, %err, "webhook failed permanently; timer abandoned");
            return Err(TaskError::SkipRetry(format!(
                "permanently failed to call the timer url: {err}"
            )));
        }

        if let Err(err) = self.service.archive_timer(timer_id).await {
            self.record("archive_failed");
            return Err(TaskError::Retry(format!(
                "failed to archive timer {timer_id}: {err}"
            )));
        }

        self.record("delivered");
        info!(timer_id, "webhook delivered and timer archived");
        Ok(())
    }
}

impl TaskHandler for WebhookProcessor {
    fn process_task<'a>(
        &'a self,
        task: &'a Task,
    ) -> Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'a>> {
        Box::pin(self.process(task))
    }
}
