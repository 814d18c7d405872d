//! Timer repository for `SQLite` persistence.
//!
//! Records live in `timer_record` as JSON values under `timer-<id>` keys
//! with an absolute expiry; the outbox is a FIFO of timer IDs; archived
//! IDs go into a Bloom filter. Every read treats an expired record as
//! absent, so TTL semantics hold even between retention sweeps.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::StorageConfig;
use crate::models::Timer;
use crate::timer::{Outbox, TimerStore};
use crate::{AppError, Result};

use super::archive_filter::ArchiveFilter;
use super::db::Database;

/// Prefix joined with the timer ID to form the record key.
pub const TIMER_KEY_PREFIX: &str = "timer-";
/// Name of the archived-set filter.
pub const ARCHIVED_FILTER_NAME: &str = "timers-archived";

/// Storage key for a timer ID.
#[must_use]
pub fn timer_key(timer_id: &str) -> String {
    format!("{TIMER_KEY_PREFIX}{timer_id}")
}

/// Wire format of the stored value.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTimer {
    id: String,
    fire_at: i64,
    url: String,
}

impl StoredTimer {
    fn from_timer(timer: &Timer) -> Self {
        Self {
            id: timer.id().to_owned(),
            fire_at: timer.fire_at().timestamp(),
            url: timer.url().to_string(),
        }
    }

    /// Convert a stored value back into the domain model.
    fn into_timer(self) -> Result<Timer> {
        let url = Url::parse(&self.url)
            .map_err(|e| AppError::InvalidUrl(format!("stored url {:?}: {e}", self.url)))?;
        let fire_at = DateTime::<Utc>::from_timestamp(self.fire_at, 0).ok_or_else(|| {
            AppError::Deserialization(format!("fire_at out of range: {}", self.fire_at))
        })?;
        Ok(Timer::from_parts(self.id, url, fire_at))
    }
}

/// Repository wrapper around `SQLite` for timer records, the outbox and
/// the archived-set.
#[derive(Clone)]
pub struct TimerRepo {
    db: Arc<Database>,
    max_ttl: chrono::Duration,
    filter: ArchiveFilter,
}

impl TimerRepo {
    /// Create a repository using the storage configuration.
    #[must_use]
    pub fn new(db: Arc<Database>, config: &StorageConfig) -> Self {
        let filter = ArchiveFilter::with_rate(
            ARCHIVED_FILTER_NAME,
            config.archive_filter_capacity,
            config.archive_filter_error_rate,
        );
        Self::with_filter(db, config.timer_max_ttl(), filter)
    }

    /// Create a repository with explicit TTL and filter parameters.
    #[must_use]
    pub fn with_filter(db: Arc<Database>, max_ttl: chrono::Duration, filter: ArchiveFilter) -> Self {
        Self {
            db,
            max_ttl,
            filter,
        }
    }

    /// Persist a timer and push its ID onto the outbox in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if either write fails; nothing is committed
    /// in that case.
    pub async fn add_timer(&self, timer: &Timer) -> Result<()> {
        let value = serde_json::to_string(&StoredTimer::from_timer(timer))
            .map_err(|e| AppError::Db(format!("serialize timer: {e}")))?;
        let expires_at = (Utc::now() + self.max_ttl).timestamp();

        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO timer_record (key, value, expires_at) VALUES (?1, ?2, ?3)")
            .bind(timer_key(timer.id()))
            .bind(&value)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO outbox (timer_id) VALUES (?1)")
            .bind(timer.id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(timer_id = timer.id(), "timer stored and queued in outbox");
        Ok(())
    }

    /// Retrieve a live timer by ID.
    ///
    /// Returns `Ok(None)` if the record does not exist or has expired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails,
    /// `AppError::Deserialization` if the stored value is malformed, and
    /// `AppError::InvalidUrl` if the stored URL no longer parses.
    pub async fn find(&self, timer_id: &str) -> Result<Option<Timer>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM timer_record WHERE key = ?1 AND expires_at > ?2")
                .bind(timer_key(timer_id))
                .bind(Utc::now().timestamp())
                .fetch_optional(self.db.as_ref())
                .await?;

        let Some((value,)) = row else {
            return Ok(None);
        };

        let stored: StoredTimer = serde_json::from_str(&value)
            .map_err(|e| AppError::Deserialization(format!("timer {timer_id}: {e}")))?;
        stored.into_timer().map(Some)
    }

    /// Whether `timer_id` was archived. Subject to the filter's
    /// false-positive rate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn is_archived(&self, timer_id: &str) -> Result<bool> {
        self.filter.contains(self.db.as_ref(), timer_id).await
    }

    /// Delete the record and add the ID to the archived-set atomically.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn archive(&self, timer_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM timer_record WHERE key = ?1")
            .bind(timer_key(timer_id))
            .execute(&mut *tx)
            .await?;
        self.filter.add(&mut *tx, timer_id).await?;
        tx.commit().await?;

        debug!(timer_id, "timer archived");
        Ok(())
    }

    /// Pop up to `batch_size` resolvable timers from the outbox.
    ///
    /// IDs whose record is gone (expired or archived) are dropped without
    /// counting toward the batch. Stops early when the outbox is empty.
    ///
    /// # Errors
    ///
    /// Any lookup failure other than "not found" aborts the call; entries
    /// popped before the failure are not returned to the outbox.
    pub async fn dequeue_outbox(&self, batch_size: usize) -> Result<Vec<Timer>> {
        let mut timers = Vec::with_capacity(batch_size);

        while timers.len() < batch_size {
            let popped: Option<(String,)> = sqlx::query_as(
                "DELETE FROM outbox WHERE seq = (SELECT MIN(seq) FROM outbox) \
                 RETURNING timer_id",
            )
            .fetch_optional(self.db.as_ref())
            .await?;

            let Some((timer_id,)) = popped else {
                break;
            };

            match self.find(&timer_id).await? {
                Some(timer) => timers.push(timer),
                None => debug!(timer_id, "outbox entry has no live record; skipped"),
            }
        }

        Ok(timers)
    }

    /// Number of IDs waiting in the outbox.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn outbox_len(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}

impl TimerStore for TimerRepo {
    fn add_timer<'a>(
        &'a self,
        timer: &'a Timer,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(TimerRepo::add_timer(self, timer))
    }

    fn find<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Timer>>> + Send + 'a>> {
        Box::pin(TimerRepo::find(self, timer_id))
    }

    fn is_archived<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(TimerRepo::is_archived(self, timer_id))
    }

    fn archive<'a>(
        &'a self,
        timer_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(TimerRepo::archive(self, timer_id))
    }
}

impl Outbox for TimerRepo {
    fn dequeue_outbox(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Timer>>> + Send + '_>> {
        Box::pin(TimerRepo::dequeue_outbox(self, batch_size))
    }
}
