//! Retention service for TTL expiry.
//!
//! Runs as a background task deleting timer records whose `expires_at`
//! has passed, then broker tasks that died longer than `max_age` ago.
//! Reads already treat expired rows as absent; the sweep only reclaims
//! space.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use crate::Result;

/// Rows removed by one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Expired timer records deleted.
    pub timer_records: u64,
    /// Dead broker tasks deleted.
    pub dead_tasks: u64,
}

/// Spawn the retention purge background task.
///
/// The first pass runs immediately, then once per `interval`.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    interval: Duration,
    max_age: chrono::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, max_age).await {
                        error!(%err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete expired timer records and dead broker tasks last touched before
/// `now - max_age`.
///
/// # Errors
///
/// Returns `AppError::Db` if either delete fails.
pub async fn purge(db: &Database, max_age: chrono::Duration) -> Result<PurgeStats> {
    let now = Utc::now();

    let timer_records = sqlx::query("DELETE FROM timer_record WHERE expires_at <= ?1")
        .bind(now.timestamp())
        .execute(db)
        .await?
        .rows_affected();

    let cutoff = (now - max_age).to_rfc3339();
    let dead_tasks = sqlx::query("DELETE FROM broker_task WHERE state = 'dead' AND updated_at < ?1")
        .bind(&cutoff)
        .execute(db)
        .await?
        .rows_affected();

    info!(timer_records, dead_tasks, "retention purge completed");
    Ok(PurgeStats {
        timer_records,
        dead_tasks,
    })
}
