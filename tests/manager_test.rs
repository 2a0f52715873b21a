//! Integration tests for schema managers.
//!
//! Tests verify that:
//! - Critical managers route reads to the WRITE connection
//! - Transactions pin a manager to the WRITE connection until they finish
//! - Live-mode commits persist and rollbacks discard
//! - Debug-mode work is never persisted, even past the connection time limit
//! - Registry-level forget normalizes labels like instance does

use schema_gate::config::{CacheOptions, CredentialEntry, Credentials};
use schema_gate::db::{ConnectionCache, ManagerRegistry};
use schema_gate::error::DbError;
use schema_gate::models::{AccessMode, ExecutionMode, Record, SqlExpression};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn temp_db_path() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

fn registry(db_path: &str, mode: ExecutionMode) -> ManagerRegistry {
    registry_with_limit(db_path, mode, Duration::from_secs(300))
}

fn registry_with_limit(db_path: &str, mode: ExecutionMode, time_limit: Duration) -> ManagerRegistry {
    let credentials = Credentials::new()
        .with_read_write("TEST", "APP", CredentialEntry::sqlite(db_path))
        .with_alias("DEFAULT", "TEST");
    let options = CacheOptions::default()
        .with_mode(mode)
        .with_time_limit(time_limit)
        .with_statement_timeout(Duration::from_secs(10));
    ManagerRegistry::new(Arc::new(ConnectionCache::new(Arc::new(credentials), options)))
}

/// Create the schema through a throwaway live registry
async fn setup_db() -> String {
    let db_path = temp_db_path();
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();
    manager
        .query_prepared(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT, balance INTEGER, updated_at TEXT)",
            &[],
        )
        .await
        .unwrap();
    db_path
}

async fn count_rows(db_path: &str) -> serde_json::Value {
    let registry = registry(db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, Some("count")).await.unwrap();
    manager
        .fetch_one("SELECT COUNT(*) FROM accounts", &[])
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_critical_manager_reads_from_write_connection() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let critical = registry.instance("APP", None, true, None).await.unwrap();

    let write = critical.get_conn(AccessMode::Write, None).await.unwrap();
    let read = critical.get_conn(AccessMode::Read, None).await.unwrap();
    assert!(Arc::ptr_eq(&write, &read));

    critical.fetch_all("SELECT * FROM accounts", &[]).await.unwrap();
    let keys: Vec<String> = registry
        .cache()
        .list_connections()
        .await
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(keys, vec!["TEST_APP_WRITE"]);
}

#[tokio::test]
async fn test_plain_manager_splits_read_and_write() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    let write = manager.get_conn(AccessMode::Write, None).await.unwrap();
    let read = manager.get_conn(AccessMode::Read, None).await.unwrap();
    assert!(!Arc::ptr_eq(&write, &read));
}

#[tokio::test]
async fn test_transaction_pins_write_connection() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    assert_eq!(manager.begin_transaction().await.unwrap(), 1);
    assert!(manager.has_active_transaction());
    manager
        .insert("accounts", &Record::new().set("owner", "ann").set("balance", 10))
        .await
        .unwrap();

    // Uncommitted row is visible because the read is routed to WRITE
    let owner = manager
        .fetch_one("SELECT owner FROM accounts WHERE id = ?", &[1.into()])
        .await
        .unwrap();
    assert_eq!(owner, Some(json!("ann")));

    manager.commit().await.unwrap();
    assert!(!manager.has_active_transaction());
    assert_eq!(count_rows(&db_path).await, json!(1));
}

#[tokio::test]
async fn test_live_rollback_discards_work() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    manager.begin_transaction().await.unwrap();
    let rows = vec![
        Record::new().set("owner", "ann").set("balance", 1),
        Record::new().set("owner", "bob").set("balance", 2),
    ];
    assert_eq!(manager.multi_insert("accounts", &rows).await.unwrap(), 2);
    manager.roll_back().await.unwrap();

    assert_eq!(count_rows(&db_path).await, json!(0));
}

#[tokio::test]
async fn test_live_nested_begin_fails() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    manager.begin_transaction().await.unwrap();
    let err = manager.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::TransactionState { depth: 1, .. }));
    manager.roll_back().await.unwrap();

    assert!(manager.commit().await.is_err());
}

#[tokio::test]
async fn test_update_with_literal_and_condition() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, true, None).await.unwrap();

    for owner in ["ann", "bob", "cy"] {
        manager
            .insert("accounts", &Record::new().set("owner", owner).set("balance", 5))
            .await
            .unwrap();
    }
    assert_eq!(manager.last_insert_id().await.unwrap(), 3);

    let values = Record::new()
        .set("balance", SqlExpression::with_args("balance + ?", vec![10.into()]))
        .literal("updated_at", "CURRENT_TIMESTAMP");
    let changed = manager
        .update(
            "accounts",
            &values,
            SqlExpression::with_args("owner IN (?, ?)", vec!["ann".into(), "cy".into()]),
            "id",
        )
        .await
        .unwrap();
    assert_eq!(changed, 2);

    let balances = manager
        .fetch_all_as_dictionary("SELECT balance, owner FROM accounts ORDER BY id", &[], 0)
        .await
        .unwrap();
    assert_eq!(balances["15"], vec![json!("ann"), json!("cy")]);
    assert_eq!(balances["5"], vec![json!("bob")]);
}

#[tokio::test]
async fn test_debug_mode_never_persists() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Debug);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    // The outer transaction is already open; this is the logical inner one
    assert_eq!(manager.begin_transaction().await.unwrap(), 2);
    manager
        .insert("accounts", &Record::new().set("owner", "ann").set("balance", 1))
        .await
        .unwrap();
    manager.commit().await.unwrap();

    let seen = manager
        .fetch_one("SELECT COUNT(*) FROM accounts", &[])
        .await
        .unwrap();
    assert_eq!(seen, Some(json!(1)));
    assert!(manager.commit().await.is_err());

    assert_eq!(count_rows(&db_path).await, json!(0));
}

#[tokio::test]
async fn test_prepare_and_strict_fetch() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("APP", None, false, None).await.unwrap();

    let stmt = manager
        .prepare("SELECT id, owner FROM accounts WHERE balance > ?")
        .await
        .unwrap();
    assert_eq!(stmt.columns, vec!["id", "owner"]);

    let err = manager
        .fetch_one_strict("SELECT owner FROM accounts WHERE id = ?", &[7.into()], "account 7")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::RowNotFound { .. }));
}

#[tokio::test]
async fn test_debug_mode_survives_connection_time_limit() {
    let db_path = setup_db().await;
    let registry = registry_with_limit(&db_path, ExecutionMode::Debug, Duration::from_millis(100));
    let manager = registry.instance("APP", None, false, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    manager
        .insert("accounts", &Record::new().set("owner", "ann").set("balance", 1))
        .await
        .unwrap();

    // The application's own begin/commit pair still nests inside the outer one
    assert_eq!(manager.begin_transaction().await.unwrap(), 2);
    manager
        .insert("accounts", &Record::new().set("owner", "bob").set("balance", 2))
        .await
        .unwrap();
    manager.commit().await.unwrap();

    let seen = manager
        .fetch_one("SELECT COUNT(*) FROM accounts", &[])
        .await
        .unwrap();
    assert_eq!(seen, Some(json!(2)));
    assert_eq!(count_rows(&db_path).await, json!(0));
}

#[tokio::test]
async fn test_forget_with_lowercase_labels() {
    let db_path = setup_db().await;
    let registry = registry(&db_path, ExecutionMode::Live);
    let manager = registry.instance("app", None, false, None).await.unwrap();

    let write = manager.get_conn(AccessMode::Write, None).await.unwrap();
    registry.forget("app", None, AccessMode::Write, None).await;
    let fresh_write = manager.get_conn(AccessMode::Write, None).await.unwrap();
    assert!(!Arc::ptr_eq(&write, &fresh_write));

    let read = manager.get_conn(AccessMode::Read, None).await.unwrap();
    registry.forget("app", Some("test"), AccessMode::Read, None).await;
    let fresh_read = manager.get_conn(AccessMode::Read, None).await.unwrap();
    assert!(!Arc::ptr_eq(&read, &fresh_read));
}
