//! Persistence layer modules.

pub mod archive_filter;
pub mod db;
pub mod retention;
pub mod schema;
pub mod timer_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
