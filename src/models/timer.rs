//! Timer model: a scheduled one-shot webhook call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{AppError, Result};

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_MINUTE: i64 = 60;

/// Request to schedule a new timer, as accepted from the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SetTimerCommand {
    /// Hours component of the delay.
    pub hours: i64,
    /// Minutes component of the delay.
    pub minutes: i64,
    /// Seconds component of the delay.
    pub seconds: i64,
    /// Raw webhook URL supplied by the client.
    pub url_raw: String,
}

/// A scheduled webhook. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    id: String,
    url: Url,
    fire_at: DateTime<Utc>,
}

impl Timer {
    /// Build a timer firing `hours:minutes:seconds` from now.
    ///
    /// A zero offset is accepted; the timer is due immediately.
    ///
    /// The URL is stored in the normalized form produced by [`Url::parse`]:
    /// scheme and host are lowercased, a default port is dropped, and an
    /// empty path becomes `/`. `url()` and the persisted record return that
    /// form, not `raw_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if `raw_url` is not an absolute URL,
    /// `AppError::FireAtInPast` if the offset is negative, and
    /// `AppError::InvalidTimer` if the offset does not fit a timestamp.
    pub fn new(raw_url: &str, hours: i64, minutes: i64, seconds: i64) -> Result<Self> {
        let url = Url::parse(raw_url)
            .map_err(|err| AppError::InvalidUrl(format!("invalid url {raw_url:?}: {err}")))?;

        let total = hours
            .checked_mul(SECONDS_PER_HOUR)
            .and_then(|h| minutes.checked_mul(SECONDS_PER_MINUTE).map(|m| (h, m)))
            .and_then(|(h, m)| h.checked_add(m))
            .and_then(|hm| hm.checked_add(seconds))
            .ok_or_else(|| AppError::InvalidTimer("delay overflows".into()))?;

        let now = Utc::now();
        let delay = Duration::try_seconds(total)
            .ok_or_else(|| AppError::InvalidTimer("delay out of range".into()))?;
        let fire_at = now
            .checked_add_signed(delay)
            .ok_or_else(|| AppError::InvalidTimer("fire time out of range".into()))?;

        if fire_at < now {
            return Err(AppError::FireAtInPast);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            url,
            fire_at,
        })
    }

    /// Build a timer from an API command.
    ///
    /// # Errors
    ///
    /// See [`Timer::new`].
    pub fn from_command(cmd: &SetTimerCommand) -> Result<Self> {
        Self::new(&cmd.url_raw, cmd.hours, cmd.minutes, cmd.seconds)
    }

    /// Reassemble a timer from stored parts. No validation happens here;
    /// call [`Timer::validate`] before trusting the result.
    #[must_use]
    pub fn from_parts(id: String, url: Url, fire_at: DateTime<Utc>) -> Self {
        Self { id, url, fire_at }
    }

    /// Check the fields of a timer that did not come from [`Timer::new`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTimer` on an empty ID, empty URL, or a
    /// zero (Unix epoch) fire time.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AppError::InvalidTimer("ID cannot be empty".into()));
        }
        if self.url.as_str().is_empty() {
            return Err(AppError::InvalidTimer("URL cannot be empty".into()));
        }
        if self.fire_at.timestamp() == 0 {
            return Err(AppError::InvalidTimer("fire_at cannot be zero".into()));
        }
        Ok(())
    }

    /// Unique identifier, also used as the idempotency token downstream.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Webhook target.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Absolute fire time.
    #[must_use]
    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }

    /// Signed delay until the fire time; negative once the timer is due.
    #[must_use]
    pub fn delay_from_now(&self) -> Duration {
        self.fire_at - Utc::now()
    }

    /// Whole seconds left before firing, floored at zero.
    #[must_use]
    pub fn time_left_seconds(&self) -> i64 {
        self.delay_from_now().num_seconds().max(0)
    }
}

/// Outcome of looking a timer up by ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerState {
    /// The timer is stored and has not been archived yet.
    Active(Timer),
    /// The timer fired successfully and was archived.
    Archived,
    /// No record exists and the ID was never archived.
    NotFound,
}
