//! Unit tests for `TimerRepo`, the storage engine.
//!
//! Validates:
//! - `add_timer` persists the record and queues the ID in one transaction
//! - `find` round-trips the URL and distinguishes absent from corrupt
//! - Expired records read as absent
//! - `archive` is idempotent and leaves the ID in the archived-set
//! - `dequeue_outbox` is FIFO, bounded, and skips unresolvable IDs

use std::sync::Arc;

use chrono::Utc;

use httpqueue::config::StorageConfig;
use httpqueue::models::Timer;
use httpqueue::persistence::archive_filter::ArchiveFilter;
use httpqueue::persistence::db::{self, Database};
use httpqueue::persistence::timer_repo::{timer_key, TimerRepo};
use httpqueue::AppError;

async fn repo() -> (Arc<Database>, TimerRepo) {
    let pool = Arc::new(db::connect_memory().await.expect("db"));
    let repo = TimerRepo::new(Arc::clone(&pool), &StorageConfig::default());
    (pool, repo)
}

fn expired_repo(pool: &Arc<Database>) -> TimerRepo {
    TimerRepo::with_filter(
        Arc::clone(pool),
        chrono::Duration::seconds(-1),
        ArchiveFilter::with_rate("timers-archived", 1_000_000, 0.01),
    )
}

fn timer(url: &str) -> Timer {
    Timer::new(url, 0, 5, 0).expect("timer")
}

async fn insert_raw(pool: &Database, timer_id: &str, value: &str) {
    sqlx::query("INSERT INTO timer_record (key, value, expires_at) VALUES (?1, ?2, ?3)")
        .bind(timer_key(timer_id))
        .bind(value)
        .bind(Utc::now().timestamp() + 3600)
        .execute(pool)
        .await
        .expect("insert raw");
}

#[test]
fn key_uses_timer_prefix() {
    assert_eq!(timer_key("abc"), "timer-abc");
}

#[tokio::test]
async fn add_then_find_round_trips() {
    let (_pool, repo) = repo().await;
    let original = timer("https://example.com/hooks/a?token=1#frag");

    repo.add_timer(&original).await.expect("add");
    let found = repo.find(original.id()).await.expect("find").expect("present");

    assert_eq!(found.id(), original.id());
    assert_eq!(found.url().as_str(), original.url().as_str());
    assert_eq!(found.fire_at().timestamp(), original.fire_at().timestamp());
    assert_eq!(repo.outbox_len().await.expect("len"), 1);
}

#[tokio::test]
async fn stored_value_uses_wire_format() {
    let (pool, repo) = repo().await;
    let original = timer("http://localhost:8000/cb");
    repo.add_timer(&original).await.expect("add");

    let (value,): (String,) = sqlx::query_as("SELECT value FROM timer_record WHERE key = ?1")
        .bind(timer_key(original.id()))
        .fetch_one(pool.as_ref())
        .await
        .expect("row");
    let json: serde_json::Value = serde_json::from_str(&value).expect("json");

    assert_eq!(json["id"], original.id());
    assert_eq!(json["fire_at"], original.fire_at().timestamp());
    assert_eq!(json["url"], "http://localhost:8000/cb");
}

#[tokio::test]
async fn find_missing_returns_none() {
    let (_pool, repo) = repo().await;
    assert!(repo.find("missing").await.expect("find").is_none());
}

#[tokio::test]
async fn find_malformed_value_is_deserialization_error() {
    let (pool, repo) = repo().await;
    insert_raw(&pool, "bad", "{not json").await;

    let err = repo.find("bad").await.expect_err("corrupt");
    assert!(matches!(err, AppError::Deserialization(_)));
}

#[tokio::test]
async fn find_bad_stored_url_is_invalid_url() {
    let (pool, repo) = repo().await;
    insert_raw(&pool, "bad-url", r#"{"id":"bad-url","fire_at":1700000000,"url":"not a url"}"#).await;

    let err = repo.find("bad-url").await.expect_err("corrupt");
    assert!(matches!(err, AppError::InvalidUrl(_)));
}

#[tokio::test]
async fn expired_records_read_as_absent() {
    let (pool, _repo) = repo().await;
    let repo = expired_repo(&pool);
    let t = timer("http://localhost/cb");

    repo.add_timer(&t).await.expect("add");
    assert!(repo.find(t.id()).await.expect("find").is_none());
}

#[tokio::test]
async fn add_is_atomic() {
    let (pool, repo) = repo().await;
    sqlx::query("DROP TABLE outbox")
        .execute(pool.as_ref())
        .await
        .expect("drop");

    let t = timer("http://localhost/cb");
    let err = repo.add_timer(&t).await.expect_err("outbox missing");
    assert!(matches!(err, AppError::Db(_)));

    let (records,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM timer_record")
        .fetch_one(pool.as_ref())
        .await
        .expect("count");
    assert_eq!(records, 0);
}

#[tokio::test]
async fn archive_removes_record_and_marks_archived() {
    let (_pool, repo) = repo().await;
    let t = timer("http://localhost/cb");
    repo.add_timer(&t).await.expect("add");

    assert!(!repo.is_archived(t.id()).await.expect("archived?"));
    repo.archive(t.id()).await.expect("archive");

    assert!(repo.find(t.id()).await.expect("find").is_none());
    assert!(repo.is_archived(t.id()).await.expect("archived?"));
}

#[tokio::test]
async fn archive_twice_is_idempotent() {
    let (_pool, repo) = repo().await;
    let t = timer("http://localhost/cb");
    repo.add_timer(&t).await.expect("add");

    repo.archive(t.id()).await.expect("first");
    repo.archive(t.id()).await.expect("second");

    assert!(repo.find(t.id()).await.expect("find").is_none());
    assert!(repo.is_archived(t.id()).await.expect("archived?"));
}

#[tokio::test]
async fn archive_of_unknown_id_still_marks_it() {
    let (_pool, repo) = repo().await;
    repo.archive("never-stored").await.expect("archive");
    assert!(repo.is_archived("never-stored").await.expect("archived?"));
}

#[tokio::test]
async fn dequeue_is_fifo_and_bounded() {
    let (_pool, repo) = repo().await;
    let timers: Vec<Timer> = (0..5).map(|i| timer(&format!("http://localhost/{i}"))).collect();
    for t in &timers {
        repo.add_timer(t).await.expect("add");
    }

    let first = repo.dequeue_outbox(2).await.expect("dequeue");
    let ids: Vec<&str> = first.iter().map(Timer::id).collect();
    assert_eq!(ids, vec![timers[0].id(), timers[1].id()]);
    assert_eq!(repo.outbox_len().await.expect("len"), 3);

    let rest = repo.dequeue_outbox(10).await.expect("dequeue");
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[2].id(), timers[4].id());
}

#[tokio::test]
async fn dequeue_empty_outbox_returns_nothing() {
    let (_pool, repo) = repo().await;
    assert!(repo.dequeue_outbox(10).await.expect("dequeue").is_empty());
}

#[tokio::test]
async fn dequeue_skips_unresolvable_ids() {
    let (pool, repo) = repo().await;
    let stale = expired_repo(&pool);

    let mut live = Vec::new();
    for i in 0..5 {
        let t = timer(&format!("http://localhost/{i}"));
        if i % 2 == 0 {
            repo.add_timer(&t).await.expect("add live");
            live.push(t.id().to_owned());
        } else {
            stale.add_timer(&t).await.expect("add expired");
        }
    }

    let dequeued = repo.dequeue_outbox(5).await.expect("dequeue");
    let ids: Vec<String> = dequeued.iter().map(|t| t.id().to_owned()).collect();
    assert_eq!(ids, live);
    assert_eq!(repo.outbox_len().await.expect("len"), 0);
}

#[tokio::test]
async fn skipped_ids_do_not_count_toward_batch() {
    let (pool, repo) = repo().await;
    let stale = expired_repo(&pool);

    stale.add_timer(&timer("http://localhost/old")).await.expect("expired");
    let live = timer("http://localhost/new");
    repo.add_timer(&live).await.expect("live");

    let dequeued = repo.dequeue_outbox(1).await.expect("dequeue");
    assert_eq!(dequeued.len(), 1);
    assert_eq!(dequeued[0].id(), live.id());
}

#[tokio::test]
async fn dequeue_aborts_on_corrupt_record() {
    let (pool, repo) = repo().await;
    insert_raw(&pool, "corrupt", "[]").await;
    sqlx::query("INSERT INTO outbox (timer_id) VALUES ('corrupt')")
        .execute(pool.as_ref())
        .await
        .expect("push");

    let err = repo.dequeue_outbox(10).await.expect_err("corrupt");
    assert!(matches!(err, AppError::Deserialization(_)));
}
