//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Target URL failed to parse as an absolute request URI.
    InvalidUrl(String),
    /// The computed fire time lies before the moment of construction.
    FireAtInPast,
    /// A timer reconstructed outside the constructor failed validation.
    InvalidTimer(String),
    /// A stored record or payload did not match the expected shape.
    Deserialization(String),
    /// The broker already holds a unique lock for an identical task.
    DuplicateTask(String),
    /// The broker already holds a task with the requested task ID.
    TaskIdConflict(String),
    /// Any other broker failure.
    Broker(String),
    /// HTTP server or client failure outside webhook delivery.
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Metric registration or encoding failure.
    Metrics(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "invalid url: {msg}"),
            Self::FireAtInPast => write!(f, "time in the past"),
            Self::InvalidTimer(msg) => write!(f, "invalid timer: {msg}"),
            Self::Deserialization(msg) => write!(f, "deserialization: {msg}"),
            Self::DuplicateTask(msg) => write!(f, "duplicate task: {msg}"),
            Self::TaskIdConflict(msg) => write!(f, "task id conflict: {msg}"),
            Self::Broker(msg) => write!(f, "broker: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Metrics(msg) => write!(f, "metrics: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
