//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::mode::AppMode;
use crate::{AppError, Result};

/// HTTP API listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Socket address the API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

/// Storage engine settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Path of the `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Upper bound on pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Lifetime of a timer record before it expires.
    #[serde(default = "default_timer_max_ttl_days")]
    pub timer_max_ttl_days: u32,
    /// Expected number of archived timers the filter is sized for.
    #[serde(default = "default_archive_filter_capacity")]
    pub archive_filter_capacity: u64,
    /// Target false-positive rate of the archived-set.
    #[serde(default = "default_archive_filter_error_rate")]
    pub archive_filter_error_rate: f64,
    /// Interval between TTL sweeps.
    #[serde(default = "default_retention_interval_seconds")]
    pub retention_interval_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            timer_max_ttl_days: default_timer_max_ttl_days(),
            archive_filter_capacity: default_archive_filter_capacity(),
            archive_filter_error_rate: default_archive_filter_error_rate(),
            retention_interval_seconds: default_retention_interval_seconds(),
        }
    }
}

impl StorageConfig {
    /// Timer record lifetime as a `chrono` duration.
    #[must_use]
    pub fn timer_max_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.timer_max_ttl_days))
    }

    /// Busy timeout as a std duration.
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data").join("httpqueue.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_timer_max_ttl_days() -> u32 {
    180
}

fn default_archive_filter_capacity() -> u64 {
    1_000_000
}

fn default_archive_filter_error_rate() -> f64 {
    0.01
}

fn default_retention_interval_seconds() -> u64 {
    3600
}

/// Outbox relay settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Tick interval of the relay loop.
    #[serde(default = "default_frequency_ms")]
    pub frequency_ms: u64,
    /// Maximum timers forwarded per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            frequency_ms: default_frequency_ms(),
            batch_size: default_batch_size(),
        }
    }
}

impl RelayConfig {
    /// Tick interval as a std duration.
    #[must_use]
    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms)
    }
}

fn default_frequency_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    10
}

/// Producer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProducerConfig {
    /// Retry budget handed to the broker with every task.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_retry: default_max_retry(),
        }
    }
}

fn default_max_retry() -> u32 {
    10
}

/// Consumer worker pool settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConsumerConfig {
    /// Number of tasks processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval between polls for due tasks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deadline for a single task invocation.
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    /// Lease held on a claimed task; an expired lease makes it claimable again.
    /// Must exceed `task_timeout_seconds`.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_seconds: default_task_timeout_seconds(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

impl ConsumerConfig {
    /// Poll interval as a std duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Task deadline as a std duration.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    /// Lease length as a std duration.
    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_task_timeout_seconds() -> u64 {
    30
}

fn default_lease_seconds() -> u64 {
    60
}

/// Webhook delivery client settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryConfig {
    /// Deadline for one webhook request.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Redirects followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl DeliveryConfig {
    /// Request deadline as a std duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Which components this process runs.
    #[serde(default)]
    pub mode: AppMode,
    /// HTTP API settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Producer settings.
    #[serde(default)]
    pub producer: ProducerConfig,
    /// Consumer settings.
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Delivery client settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HTTPQUEUE_*` environment overrides on top of parsed values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override is malformed or leaves the
    /// configuration invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(mode) = env::var("HTTPQUEUE_MODE") {
            self.mode = mode.parse()?;
            info!(mode = %self.mode, "mode overridden from environment");
        }
        if let Ok(path) = env::var("HTTPQUEUE_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Ok(addr) = env::var("HTTPQUEUE_BIND_ADDR") {
            self.http.bind_addr = addr;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.relay.batch_size == 0 {
            return Err(AppError::Config(
                "relay.batch_size must be greater than zero".into(),
            ));
        }
        if self.relay.frequency_ms == 0 {
            return Err(AppError::Config(
                "relay.frequency_ms must be greater than zero".into(),
            ));
        }
        if self.consumer.concurrency == 0 {
            return Err(AppError::Config(
                "consumer.concurrency must be greater than zero".into(),
            ));
        }
        if self.consumer.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "consumer.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.consumer.task_timeout_seconds == 0 {
            return Err(AppError::Config(
                "consumer.task_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.consumer.lease_seconds == 0 {
            return Err(AppError::Config(
                "consumer.lease_seconds must be greater than zero".into(),
            ));
        }
        // A lease must cover a whole delivery attempt.
        if self.consumer.lease_seconds <= self.consumer.task_timeout_seconds {
            return Err(AppError::Config(
                "consumer.lease_seconds must exceed consumer.task_timeout_seconds".into(),
            ));
        }
        if self.storage.archive_filter_capacity == 0 {
            return Err(AppError::Config(
                "storage.archive_filter_capacity must be greater than zero".into(),
            ));
        }
        let rate = self.storage.archive_filter_error_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(AppError::Config(
                "storage.archive_filter_error_rate must be within (0, 1)".into(),
            ));
        }
        if self.storage.timer_max_ttl_days == 0 {
            return Err(AppError::Config(
                "storage.timer_max_ttl_days must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
