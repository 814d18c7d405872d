//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates the timer key/value table, the outbox list, the archived-set
/// bitmap and the broker task table. Safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS timer_record (
    key             TEXT PRIMARY KEY NOT NULL,
    value           TEXT NOT NULL,
    expires_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    timer_id        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archive_filter_bit (
    filter          TEXT NOT NULL,
    bit             INTEGER NOT NULL,
    PRIMARY KEY (filter, bit)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS broker_task (
    id              TEXT PRIMARY KEY NOT NULL,
    type_name       TEXT NOT NULL,
    payload         BLOB NOT NULL,
    state           TEXT NOT NULL CHECK(state IN ('scheduled','active','retry','dead')),
    process_at      INTEGER NOT NULL,
    max_retry       INTEGER NOT NULL,
    retried         INTEGER NOT NULL DEFAULT 0,
    lease_until     INTEGER,
    unique_key      TEXT,
    unique_until    INTEGER,
    last_error      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_timer_record_expires ON timer_record(expires_at);
CREATE INDEX IF NOT EXISTS idx_broker_task_due ON broker_task(state, process_at);
CREATE INDEX IF NOT EXISTS idx_broker_task_unique ON broker_task(unique_key);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
