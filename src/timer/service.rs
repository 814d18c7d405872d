//! Timer service: the operations the API and the processor call.

use std::sync::Arc;

use tracing::{debug, info};

use crate::models::{SetTimerCommand, Timer, TimerState};
use crate::Result;

use super::TimerStore;

/// Thin domain layer over a [`TimerStore`].
#[derive(Clone)]
pub struct TimerService {
    store: Arc<dyn TimerStore>,
}

impl TimerService {
    /// Create a service backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TimerStore>) -> Self {
        Self { store }
    }

    /// Build a timer from `cmd` and persist it.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`Timer::new`] or the store's
    /// error if persisting fails.
    pub async fn create_timer(&self, cmd: &SetTimerCommand) -> Result<Timer> {
        let timer = Timer::from_command(cmd)?;
        self.store.add_timer(&timer).await?;
        info!(timer_id = timer.id(), fire_at = %timer.fire_at(), "timer created");
        Ok(timer)
    }

    /// Resolve the state of `timer_id`.
    ///
    /// A stored record wins over the archived-set, so a false positive in
    /// the filter never hides a live timer.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures; they are never reported as
    /// [`TimerState::NotFound`].
    pub async fn get_timer(&self, timer_id: &str) -> Result<TimerState> {
        if let Some(timer) = self.store.find(timer_id).await? {
            return Ok(TimerState::Active(timer));
        }
        if self.store.is_archived(timer_id).await? {
            debug!(timer_id, "timer found in archived-set");
            return Ok(TimerState::Archived);
        }
        Ok(TimerState::NotFound)
    }

    /// Archive `timer_id` after a successful delivery.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn archive_timer(&self, timer_id: &str) -> Result<()> {
        self.store.archive(timer_id).await
    }
}
