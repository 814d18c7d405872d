//! Producer: hands validated timers to the broker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::broker::{Broker, EnqueueOptions};
use crate::models::Timer;
use crate::timer::Producer;
use crate::Result;

use super::task;

/// Schedules one webhook task per timer at the timer's fire time.
///
/// The task ID is the timer ID, so a timer can be enqueued at most once
/// while its task is still held by the broker.
#[derive(Clone)]
pub struct TimerProducer {
    broker: Arc<dyn Broker>,
    max_retry: u32,
}

impl TimerProducer {
    /// Create a producer that grants each task `max_retry` retries.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, max_retry: u32) -> Self {
        Self { broker, max_retry }
    }

    /// Validate `timer` and enqueue its task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTimer` without contacting the broker when
    /// validation fails; broker errors are returned unchanged.
    pub async fn send(&self, timer: &Timer) -> Result<()> {
        timer.validate()?;

        let task = task::new_task(timer.id())?;
        let options = EnqueueOptions {
            max_retry: self.max_retry,
            process_at: Some(timer.fire_at()),
            task_id: Some(timer.id().to_owned()),
            unique_for: None,
        };
        let info = self.broker.enqueue(task, options).await?;

        debug!(
            timer_id = timer.id(),
            task_id = %info.id,
            process_at = %info.process_at,
            "timer handed to broker"
        );
        Ok(())
    }
}

impl Producer for TimerProducer {
    fn send<'a>(
        &'a self,
        timer: &'a Timer,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(TimerProducer::send(self, timer))
    }
}
