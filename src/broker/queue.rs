//! `SQLite`-backed task queue.
//!
//! Tasks live in `broker_task`. Times (`process_at`, `lease_until`,
//! `unique_until`) are Unix milliseconds. A task is due when it is
//! `scheduled` or `retry` with `process_at <= now`, or `active` with an
//! expired lease (its worker died). Claiming flips due rows to `active`
//! in one `UPDATE ... RETURNING`, so two workers never lease the same task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::persistence::db::Database;
use crate::{AppError, Result};

use super::{Broker, EnqueueOptions, Task, TaskInfo, TaskState};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    type_name: String,
    state: String,
    process_at: i64,
    max_retry: i64,
    retried: i64,
    last_error: Option<String>,
}

impl TaskRow {
    /// Convert a database row into a task snapshot.
    fn into_task_info(self) -> Result<TaskInfo> {
        Ok(TaskInfo {
            state: self.state.parse()?,
            process_at: millis_to_datetime(self.process_at)?,
            max_retry: to_u32(self.max_retry, "max_retry")?,
            retried: to_u32(self.retried, "retried")?,
            id: self.id,
            type_name: self.type_name,
            last_error: self.last_error,
        })
    }
}

/// Row returned when leasing a task.
#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: String,
    type_name: String,
    payload: Vec<u8>,
    max_retry: i64,
    retried: i64,
}

/// A task leased to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    /// Task ID.
    pub id: String,
    /// Type tag and payload.
    pub task: Task,
    /// Retries consumed before this attempt.
    pub retried: u32,
    /// Retry budget.
    pub max_retry: u32,
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Db(format!("timestamp out of range: {ms}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Db(format!("invalid {column}: {value}")))
}

/// Uniqueness key of a task: its type plus a digest of its payload.
fn unique_key(task: &Task) -> String {
    format!("{}:{:x}", task.type_name(), Sha256::digest(task.payload()))
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Durable task queue.
#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<Database>,
    lease_ms: i64,
}

impl TaskQueue {
    /// Create a queue whose claims hold a lease of `lease`.
    #[must_use]
    pub fn new(db: Arc<Database>, lease: Duration) -> Self {
        Self {
            db,
            lease_ms: duration_millis(lease),
        }
    }

    /// Store a new task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateTask` if an identical task holds a live
    /// unique lock, `AppError::TaskIdConflict` if the ID is taken, or
    /// `AppError::Db` on any other failure.
    pub async fn enqueue(&self, task: Task, options: EnqueueOptions) -> Result<TaskInfo> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let id = options
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let process_at = options.process_at.unwrap_or(now);
        let (unique, unique_until) = match options.unique_for {
            Some(window) => (
                Some(unique_key(&task)),
                Some(now_ms.saturating_add(duration_millis(window))),
            ),
            None => (None, None),
        };

        let mut tx = self.db.begin().await?;

        if let Some(key) = &unique {
            let holder: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM broker_task WHERE unique_key = ?1 AND unique_until > ?2 LIMIT 1",
            )
            .bind(key)
            .bind(now_ms)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some((holder,)) = holder {
                return Err(AppError::DuplicateTask(format!(
                    "task {holder} holds the unique lock for {}",
                    task.type_name()
                )));
            }
        }

        let created_at = now.to_rfc3339();
        let inserted = sqlx::query(
            "INSERT INTO broker_task (id, type_name, payload, state, process_at,
             max_retry, retried, unique_key, unique_until, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)",
        )
        .bind(&id)
        .bind(task.type_name())
        .bind(task.payload())
        .bind(TaskState::Scheduled.as_str())
        .bind(process_at.timestamp_millis())
        .bind(i64::from(options.max_retry))
        .bind(&unique)
        .bind(unique_until)
        .bind(&created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            return Err(match &err {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    AppError::TaskIdConflict(format!("task id {id} already exists"))
                }
                _ => AppError::from(err),
            });
        }
        tx.commit().await?;

        debug!(task_id = %id, task_type = task.type_name(), %process_at, "task enqueued");
        Ok(TaskInfo {
            id,
            type_name: task.type_name().to_owned(),
            state: TaskState::Scheduled,
            max_retry: options.max_retry,
            retried: 0,
            process_at,
            last_error: None,
        })
    }

    /// Lease up to `limit` due tasks, oldest `process_at` first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn claim(&self, limit: usize) -> Result<Vec<ClaimedTask>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let rows: Vec<ClaimRow> = sqlx::query_as(
            "UPDATE broker_task SET state = 'active', lease_until = ?1, updated_at = ?2
             WHERE id IN (
                 SELECT id FROM broker_task
                 WHERE (state IN ('scheduled', 'retry') AND process_at <= ?3)
                    OR (state = 'active' AND lease_until <= ?3)
                 ORDER BY process_at
                 LIMIT ?4)
             RETURNING id, type_name, payload, max_retry, retried",
        )
        .bind(now_ms.saturating_add(self.lease_ms))
        .bind(now.to_rfc3339())
        .bind(now_ms)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ClaimedTask {
                    retried: to_u32(row.retried, "retried")?,
                    max_retry: to_u32(row.max_retry, "max_retry")?,
                    task: Task::new(row.type_name, row.payload),
                    id: row.id,
                })
            })
            .collect()
    }

    /// Remove a task that finished successfully.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn complete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM broker_task WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Schedule another attempt `delay` from now and count the retry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn retry(&self, id: &str, error: &str, delay: Duration) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE broker_task SET state = 'retry', retried = retried + 1,
             process_at = ?1, lease_until = NULL, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(now.timestamp_millis().saturating_add(duration_millis(delay)))
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Move a task to the dead state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn kill(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE broker_task SET state = 'dead', lease_until = NULL,
             last_error = ?1, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Look up a task by ID.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the row is malformed.
    pub async fn get(&self, id: &str) -> Result<Option<TaskInfo>> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, type_name, state, process_at, max_retry, retried, last_error
             FROM broker_task WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(TaskRow::into_task_info).transpose()
    }

    /// Number of tasks in `state`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self, state: TaskState) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM broker_task WHERE state = ?1")
            .bind(state.as_str())
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}

impl Broker for TaskQueue {
    fn enqueue(
        &self,
        task: Task,
        options: EnqueueOptions,
    ) -> Pin<Box<dyn Future<Output = Result<TaskInfo>> + Send + '_>> {
        Box::pin(TaskQueue::enqueue(self, task, options))
    }
}
