//! Relay: drains the outbox on a fixed interval and forwards each timer
//! to the producer.
//!
//! Ticks never overlap. A dispatch that overruns the period delays the
//! next tick instead of queueing a burst. Failures are counted and logged;
//! a timer whose send fails is not re-queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::RelayConfig;
use crate::metrics::{MetricsSink, RELAY_ERRORS};
use crate::timer::{Outbox, Producer};
use crate::AppError;

/// Metric reason for a failed dequeue.
#[must_use]
pub fn dequeue_error_reason(err: &AppError) -> &'static str {
    match err {
        AppError::InvalidUrl(_) => "bad_url",
        AppError::Deserialization(_) => "deserialization",
        _ => "other",
    }
}

/// Metric reason for a failed send.
#[must_use]
pub fn producer_error_reason(err: &AppError) -> &'static str {
    match err {
        AppError::DuplicateTask(_) => "duplicate_task",
        AppError::TaskIdConflict(_) => "id_conflict",
        _ => "other",
    }
}

/// Periodic outbox-to-producer forwarder.
pub struct Relay {
    outbox: Arc<dyn Outbox>,
    producer: Arc<dyn Producer>,
    metrics: Arc<dyn MetricsSink>,
    frequency: Duration,
    batch_size: usize,
}

impl Relay {
    /// Create a relay using the relay settings.
    #[must_use]
    pub fn new(
        config: &RelayConfig,
        outbox: Arc<dyn Outbox>,
        producer: Arc<dyn Producer>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            outbox,
            producer,
            metrics,
            frequency: config.frequency(),
            batch_size: config.batch_size,
        }
    }

    /// Spawn the ticking loop. The first tick fires immediately. The loop
    /// stops when `cancel` fires; an in-flight dispatch finishes first.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let batch_size = self.batch_size;
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(self.frequency);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!(frequency = ?self.frequency, "relay started");

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("relay shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            self.dispatch().await;
                        }
                    }
                }
            }
            .instrument(info_span!("relay", batch_size)),
        )
    }

    /// Run one tick: dequeue a batch and send every timer in it.
    pub async fn dispatch(&self) {
        let timers = match self.outbox.dequeue_outbox(self.batch_size).await {
            Ok(timers) => timers,
            Err(err) => {
                let reason = dequeue_error_reason(&err);
                self.metrics
                    .increment_counter(RELAY_ERRORS, &[("type", "dequeue"), ("reason", reason)]);
                error!(%err, reason, "unable to dequeue the outbox");
                return;
            }
        };

        if !timers.is_empty() {
            debug!(count = timers.len(), "relaying timers");
        }

        for timer in &timers {
            if let Err(err) = self.producer.send(timer).await {
                let reason = producer_error_reason(&err);
                self.metrics
                    .increment_counter(RELAY_ERRORS, &[("type", "producer"), ("reason", reason)]);
                error!(%err, reason, timer_id = timer.id(), "unable to relay timer to the producer");
            }
        }
    }
}
