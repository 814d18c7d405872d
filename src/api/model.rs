//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::models::{SetTimerCommand, Timer};

/// Body of `POST /timers`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SetTimerRequest {
    /// Hours component of the delay.
    #[serde(default)]
    pub hours: i64,
    /// Minutes component of the delay.
    #[serde(default)]
    pub minutes: i64,
    /// Seconds component of the delay.
    #[serde(default)]
    pub seconds: i64,
    /// Webhook target.
    pub url: String,
}

impl SetTimerRequest {
    /// Convert into the domain command.
    #[must_use]
    pub fn into_command(self) -> SetTimerCommand {
        SetTimerCommand {
            hours: self.hours,
            minutes: self.minutes,
            seconds: self.seconds,
            url_raw: self.url,
        }
    }
}

/// Body of a `201` answer to `POST /timers`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SetTimerResponse {
    /// ID of the new timer.
    pub id: String,
}

/// Body of a `200` answer to `GET /timers/{id}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GetTimerResponse {
    /// Timer ID.
    pub id: String,
    /// Whole seconds until the webhook fires; zero once archived.
    pub time_left: i64,
}

impl GetTimerResponse {
    /// Response for a live timer.
    #[must_use]
    pub fn active(timer: &Timer) -> Self {
        Self {
            id: timer.id().to_owned(),
            time_left: timer.time_left_seconds(),
        }
    }

    /// Response for an archived timer.
    #[must_use]
    pub fn archived(timer_id: &str) -> Self {
        Self {
            id: timer_id.to_owned(),
            time_left: 0,
        }
    }
}
