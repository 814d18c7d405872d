//! Capabilities the timer pipeline is assembled from.
//!
//! Each stage receives its collaborators as trait objects so tests can
//! substitute in-memory fakes. [`service::TimerService`] composes them into
//! the create/get/archive operations the API and processor call.

pub mod service;

use std::future::Future;
use std::pin::Pin;

use crate::delivery::DeliveryError;
use crate::models::Timer;
use crate::Result;

pub use service::TimerService;

/// Durable timer records plus the archived-set.
pub trait TimerStore: Send + Sync {
    /// Persist `timer` and queue it in the outbox, atomically.
    fn add_timer<'a>(
        &'a self,
        timer: &'a Timer,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Load a timer; `Ok(None)` when it does not exist.
    fn find<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Timer>>> + Send + 'a>>;

    /// Test the archived-set.
    fn is_archived<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Remove the record and mark the ID archived, atomically. Idempotent.
    fn archive<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// FIFO of timers waiting to be forwarded to the broker.
pub trait Outbox: Send + Sync {
    /// Pop up to `batch_size` resolvable timers.
    fn dequeue_outbox(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Timer>>> + Send + '_>>;
}

/// Hands timers to the broker.
pub trait Producer: Send + Sync {
    /// Schedule delivery of `timer` at its fire time.
    fn send<'a>(&'a self, timer: &'a Timer)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Performs the webhook call.
pub trait WebhookShooter: Send + Sync {
    /// POST to the timer URL and classify the outcome.
    fn shoot<'a>(
        &'a self,
        timer: &'a Timer,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), DeliveryError>> + Send + 'a>>;
}
