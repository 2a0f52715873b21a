//! Integration tests for the connection cache.
//!
//! Tests verify that:
//! - Handles are reused within the time limit and recreated after it
//! - Concurrent misses for one key end up sharing a single handle
//! - Forgetting connections only affects the live key space
//! - New connections see the same SQLite file through READ and WRITE
//! - A handle whose transaction statement timed out is replaced

use schema_gate::config::{CacheOptions, CredentialEntry, Credentials};
use schema_gate::db::ConnectionCache;
use schema_gate::error::DbError;
use schema_gate::models::{AccessMode, ExecutionMode, Record};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Create a SQLite file with one table and a cache pointing at it
async fn setup_cache(mode: ExecutionMode, time_limit: Duration) -> (Arc<ConnectionCache>, String) {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let credentials = Credentials::new()
        .with_read_write("TEST", "APP", CredentialEntry::sqlite(&db_path))
        .with_alias("DEFAULT", "TEST");
    let options = CacheOptions::default()
        .with_mode(mode)
        .with_time_limit(time_limit);
    let cache = Arc::new(ConnectionCache::new(Arc::new(credentials), options));

    let handle = cache
        .get_connection("TEST", "APP", AccessMode::Write, Some("setup"))
        .await
        .unwrap();
    handle
        .query_prepared(
            "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY, label TEXT)",
            &[],
        )
        .await
        .unwrap();

    (cache, db_path)
}

#[tokio::test]
async fn test_same_handle_within_time_limit() {
    let (cache, _path) = setup_cache(ExecutionMode::Live, Duration::from_secs(300)).await;

    let first = cache
        .get_connection("DEFAULT", "APP", AccessMode::Read, None)
        .await
        .unwrap();
    let second = cache
        .get_connection("TEST", "APP", AccessMode::Read, None)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.id(), second.id());
}

#[tokio::test]
async fn test_new_handle_after_time_limit() {
    let (cache, _path) = setup_cache(ExecutionMode::Live, Duration::from_millis(100)).await;

    let first = cache
        .get_connection("TEST", "APP", AccessMode::Read, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = cache
        .get_connection("TEST", "APP", AccessMode::Read, None)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    let listed = cache.list_connections().await;
    let entry = listed.iter().find(|m| m.key == "TEST_APP_READ").unwrap();
    assert_eq!(entry.handle_id, second.id());
    assert!(!entry.expired);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_handle() {
    let (cache, _path) = setup_cache(ExecutionMode::Live, Duration::from_secs(300)).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_connection("TEST", "APP", AccessMode::Write, None)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    let stored = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &stored)));
}

#[tokio::test]
async fn test_forget_all_then_fresh_handle() {
    let (cache, _path) = setup_cache(ExecutionMode::Live, Duration::from_secs(300)).await;

    let before = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    cache.forget_all_connections().await;
    assert_eq!(cache.connection_count().await, 0);

    let after = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_write_visible_to_read_connection() {
    let (cache, _path) = setup_cache(ExecutionMode::Live, Duration::from_secs(300)).await;

    let writer = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    let id = writer
        .insert("items", &Record::new().set("label", "first"))
        .await
        .unwrap();

    let reader = cache
        .get_connection("TEST", "APP", AccessMode::Read, None)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&writer, &reader));
    let label = reader
        .fetch_one("SELECT label FROM items WHERE id = ?", &[(id as i64).into()])
        .await
        .unwrap();
    assert_eq!(label, Some(json!("first")));
}

#[tokio::test]
async fn test_debug_space_survives_forget() {
    let (cache, _path) = setup_cache(ExecutionMode::Debug, Duration::from_secs(300)).await;

    let before = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    cache.forget_all_connections().await;
    cache
        .forget_connection("APP", "TEST", AccessMode::Write, None)
        .await;
    let after = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.mode(), ExecutionMode::Debug);
}

#[tokio::test]
async fn test_timed_out_transaction_statement_replaces_handle() {
    let credentials = Credentials::new().with_read_write(
        "TEST",
        "APP",
        CredentialEntry::sqlite(":memory:"),
    );
    // Every statement runs out of time before the driver answers
    let options = CacheOptions::default().with_statement_timeout(Duration::ZERO);
    let cache = ConnectionCache::new(Arc::new(credentials), options);

    let first = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    let err = first.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::Timeout { .. }));
    assert!(first.is_broken());

    let second = cache
        .get_connection("TEST", "APP", AccessMode::Write, None)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(!second.is_broken());
    assert_eq!(cache.connection_count().await, 1);
}
