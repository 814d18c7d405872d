//! Broker task wire format for timer webhooks.

use serde::{Deserialize, Serialize};

use crate::broker::Task;
use crate::Result;

/// Type tag routing tasks to the webhook processor.
pub const TYPE_NAME: &str = "timer:webhook";

/// Task payload: only the ID travels, the processor re-reads the timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerPayload {
    /// ID of the timer to fire.
    #[serde(rename = "TimerID")]
    pub timer_id: String,
}

/// Build the broker task for `timer_id`.
///
/// # Errors
///
/// Returns `AppError::Deserialization` if the payload cannot be encoded.
pub fn new_task(timer_id: &str) -> Result<Task> {
    let payload = serde_json::to_vec(&TimerPayload {
        timer_id: timer_id.to_owned(),
    })?;
    Ok(Task::new(TYPE_NAME, payload))
}

/// Decode the payload of a webhook task.
///
/// # Errors
///
/// Returns `AppError::Deserialization` if the bytes are not a valid payload.
pub fn decode_payload(payload: &[u8]) -> Result<TimerPayload> {
    Ok(serde_json::from_slice(payload)?)
}
