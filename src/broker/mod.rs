//! Durable delayed-task broker.
//!
//! The pipeline only sees two seams: [`Broker::enqueue`] with a scheduled
//! time and retry budget, and [`TaskHandler`] invoked by the
//! [`server::WorkerServer`] at or after that time. Scheduling, leasing,
//! backoff and the dead state live behind them in [`queue::TaskQueue`].

pub mod queue;
pub mod server;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{AppError, Result};

/// A unit of work: a type tag used for routing plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    type_name: String,
    payload: Vec<u8>,
}

impl Task {
    /// Create a task.
    #[must_use]
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Routing tag.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Delivery options passed alongside a task at submission time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Retries allowed after the first attempt.
    pub max_retry: u32,
    /// Earliest time the task may run; `None` means now.
    pub process_at: Option<DateTime<Utc>>,
    /// Caller-chosen ID; a second task with the same ID is rejected.
    pub task_id: Option<String>,
    /// Reject identical tasks (same type and payload) for this long.
    pub unique_for: Option<Duration>,
}

/// Lifecycle state of a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for `process_at`.
    Scheduled,
    /// Leased by a worker.
    Active,
    /// Waiting for its next attempt after a failure.
    Retry,
    /// Out of retries or rejected by its handler; never runs again.
    Dead,
}

impl TaskState {
    /// Column value used in `broker_task.state`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Retry => "retry",
            Self::Dead => "dead",
        }
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "retry" => Ok(Self::Retry),
            "dead" => Ok(Self::Dead),
            other => Err(AppError::Broker(format!("unknown task state: {other}"))),
        }
    }
}

/// Snapshot of a stored task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task ID.
    pub id: String,
    /// Routing tag.
    pub type_name: String,
    /// Current state.
    pub state: TaskState,
    /// Retry budget.
    pub max_retry: u32,
    /// Retries consumed so far.
    pub retried: u32,
    /// Next time the task becomes due.
    pub process_at: DateTime<Utc>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

/// Handler verdict for a failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Transient failure; run again after backoff while budget remains.
    Retry(String),
    /// The task can never succeed; move it to the dead state now.
    SkipRetry(String),
}

impl TaskError {
    /// Whether the broker should schedule another attempt.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry(msg) => write!(f, "{msg}"),
            Self::SkipRetry(msg) => write!(f, "{msg}: skip retry"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Submission side of the broker.
pub trait Broker: Send + Sync {
    /// Store `task` for execution at `options.process_at`.
    ///
    /// Fails with `AppError::TaskIdConflict` when the task ID is taken and
    /// `AppError::DuplicateTask` when an identical task holds a unique lock.
    fn enqueue(
        &self,
        task: Task,
        options: EnqueueOptions,
    ) -> Pin<Box<dyn Future<Output = Result<TaskInfo>> + Send + '_>>;
}

/// Consumption side: executes one task.
pub trait TaskHandler: Send + Sync {
    /// Process `task`. `Ok` completes it; see [`TaskError`] otherwise.
    fn process_task<'a>(
        &'a self,
        task: &'a Task,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), TaskError>> + Send + 'a>>;
}
