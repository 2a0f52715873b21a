//! Physical database connections.
//!
//! A `RawConnection` wraps exactly one driver connection and offers "execute
//! with positional parameters" plus physical BEGIN/COMMIT/ROLLBACK. It keeps
//! no transaction bookkeeping of its own; `TransactionalHandle` does that.

use crate::config::{CacheOptions, CredentialEntry, SessionSettings};
use crate::db::params::{mysql_query, sqlite_query};
use crate::db::types::to_result_set;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecuteResult, PreparedStatement, QueryParam, ResultSet};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Column, ConnectOptions, Executor, MySqlConnection, SqliteConnection, Statement};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Driver-specific connection (avoids AnyConnection limitations).
#[derive(Debug)]
pub enum RawConnection {
    MySql(MySqlConnection),
    SQLite(SqliteConnection),
}

impl RawConnection {
    /// Open a connection for a credential entry.
    pub async fn connect(entry: &CredentialEntry, options: &CacheOptions) -> DbResult<Self> {
        let connect_timeout = options.connect_timeout;
        match entry.driver {
            DatabaseType::MySQL => {
                let mut connect_options = MySqlConnectOptions::new()
                    .host(&entry.host)
                    .username(&entry.user)
                    .password(&entry.pass)
                    .database(&entry.name);
                if let Some(port) = entry.port.or_else(|| entry.driver.default_port()) {
                    connect_options = connect_options.port(port);
                }
                let conn = timeout(connect_timeout, connect_options.connect())
                    .await
                    .map_err(|_| timeout_error("connect", connect_timeout))?
                    .map_err(|e| connect_error(entry, &e))?;
                Ok(RawConnection::MySql(conn))
            }
            DatabaseType::SQLite => {
                let connect_options = if entry.name == ":memory:" {
                    SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                        DbError::configuration(format!("Invalid SQLite database: {e}"))
                    })?
                } else {
                    SqliteConnectOptions::new()
                        .filename(&entry.name)
                        .create_if_missing(true)
                };
                let conn = timeout(connect_timeout, connect_options.connect())
                    .await
                    .map_err(|_| timeout_error("connect", connect_timeout))?
                    .map_err(|e| connect_error(entry, &e))?;
                Ok(RawConnection::SQLite(conn))
            }
        }
    }

    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            RawConnection::MySql(_) => DatabaseType::MySQL,
            RawConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Set session time zone and character set.
    ///
    /// SQLite has no session time zone and is always UTF-8, so nothing is sent.
    pub async fn apply_session(
        &mut self,
        session: &SessionSettings,
        limit: Duration,
    ) -> DbResult<()> {
        session.validate()?;
        if self.db_type() == DatabaseType::SQLite {
            debug!("SQLite connection: no session settings to apply");
            return Ok(());
        }

        let time_zone = format!(
            "SET time_zone = '{}'",
            session.time_zone.replace('\'', "''")
        );
        let names = format!("SET NAMES {}", session.charset);
        self.execute(&time_zone, &[], limit).await?;
        self.execute(&names, &[], limit).await?;
        Ok(())
    }

    /// Execute a statement and report rows affected and the last insert id.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        limit: Duration,
    ) -> DbResult<ExecuteResult> {
        match self {
            RawConnection::MySql(conn) => {
                // Without params the text protocol is used, which also accepts
                // statements MySQL refuses to prepare (SET, BEGIN...)
                let result = if params.is_empty() {
                    with_timeout("statement", limit, conn.execute(sql)).await?
                } else {
                    with_timeout("statement", limit, mysql_query(sql, params).execute(&mut *conn))
                        .await?
                };
                Ok(ExecuteResult {
                    rows_affected: result.rows_affected(),
                    last_insert_id: result.last_insert_id(),
                })
            }
            RawConnection::SQLite(conn) => {
                let result = if params.is_empty() {
                    with_timeout("statement", limit, conn.execute(sql)).await?
                } else {
                    with_timeout(
                        "statement",
                        limit,
                        sqlite_query(sql, params).execute(&mut *conn),
                    )
                    .await?
                };
                Ok(ExecuteResult {
                    rows_affected: result.rows_affected(),
                    last_insert_id: u64::try_from(result.last_insert_rowid()).unwrap_or(0),
                })
            }
        }
    }

    /// Run a statement and collect every row it returns.
    pub async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        limit: Duration,
    ) -> DbResult<ResultSet> {
        match self {
            RawConnection::MySql(conn) => {
                let rows = if params.is_empty() {
                    with_timeout("query", limit, conn.fetch_all(sql)).await?
                } else {
                    with_timeout("query", limit, mysql_query(sql, params).fetch_all(&mut *conn))
                        .await?
                };
                Ok(to_result_set(&rows))
            }
            RawConnection::SQLite(conn) => {
                let rows = if params.is_empty() {
                    with_timeout("query", limit, conn.fetch_all(sql)).await?
                } else {
                    with_timeout("query", limit, sqlite_query(sql, params).fetch_all(&mut *conn))
                        .await?
                };
                Ok(to_result_set(&rows))
            }
        }
    }

    /// Prepare a statement without executing it.
    pub async fn prepare(&mut self, sql: &str, limit: Duration) -> DbResult<PreparedStatement> {
        match self {
            RawConnection::MySql(conn) => {
                let stmt = with_timeout("prepare", limit, conn.prepare(sql)).await?;
                Ok(PreparedStatement {
                    sql: sql.to_string(),
                    columns: stmt.columns().iter().map(|c| c.name().to_string()).collect(),
                    parameter_count: stmt
                        .parameters()
                        .map(|p| p.either(|types| types.len(), |n| n)),
                })
            }
            RawConnection::SQLite(conn) => {
                let stmt = with_timeout("prepare", limit, conn.prepare(sql)).await?;
                Ok(PreparedStatement {
                    sql: sql.to_string(),
                    columns: stmt.columns().iter().map(|c| c.name().to_string()).collect(),
                    parameter_count: stmt
                        .parameters()
                        .map(|p| p.either(|types| types.len(), |n| n)),
                })
            }
        }
    }

    pub async fn begin(&mut self, limit: Duration) -> DbResult<()> {
        self.execute("BEGIN", &[], limit).await.map(|_| ())
    }

    pub async fn commit(&mut self, limit: Duration) -> DbResult<()> {
        self.execute("COMMIT", &[], limit).await.map(|_| ())
    }

    pub async fn rollback(&mut self, limit: Duration) -> DbResult<()> {
        self.execute("ROLLBACK", &[], limit).await.map(|_| ())
    }
}

async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> DbResult<T> {
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(timeout_error(operation, limit)),
    }
}

fn timeout_error(operation: &str, limit: Duration) -> DbError {
    DbError::timeout(operation, limit.as_secs())
}

/// Generate a helpful connection error.
fn connect_error(entry: &CredentialEntry, error: &sqlx::Error) -> DbError {
    let error_str = error.to_string().to_lowercase();

    let suggestion = if error_str.contains("connection refused") {
        format!("Check that the {} server at '{}' is running and accessible", entry.driver, entry.host)
    } else if error_str.contains("access denied") || error_str.contains("password") {
        "Verify the user and password in the credentials file".to_string()
    } else if error_str.contains("unknown database") {
        format!("Check that the database '{}' exists", entry.name)
    } else {
        match entry.driver {
            DatabaseType::MySQL => "Verify host, port, user and schema name".to_string(),
            DatabaseType::SQLite => format!(
                "Verify the file path '{}' is accessible and writable",
                entry.name
            ),
        }
    };

    DbError::connection(format!("Database connection failed: {}", error), suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LIMIT: Duration = Duration::from_secs(5);

    async fn memory() -> RawConnection {
        RawConnection::connect(&CredentialEntry::sqlite(":memory:"), &CacheOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_execute_and_fetch() {
        let mut conn = memory().await;
        assert_eq!(conn.db_type(), DatabaseType::SQLite);
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[], LIMIT)
            .await
            .unwrap();
        let result = conn
            .execute("INSERT INTO t (name) VALUES (?)", &["ann".into()], LIMIT)
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, 1);

        let rs = conn
            .fetch("SELECT id, name FROM t WHERE id = ?", &[QueryParam::Int(1)], LIMIT)
            .await
            .unwrap();
        assert_eq!(rs.columns, vec!["id", "name"]);
        assert_eq!(rs.rows, vec![vec![json!(1), json!("ann")]]);
    }

    #[tokio::test]
    async fn test_sqlite_physical_rollback() {
        let mut conn = memory().await;
        conn.execute("CREATE TABLE t (id INTEGER)", &[], LIMIT).await.unwrap();
        conn.begin(LIMIT).await.unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[], LIMIT).await.unwrap();
        conn.rollback(LIMIT).await.unwrap();
        let rs = conn.fetch("SELECT COUNT(*) FROM t", &[], LIMIT).await.unwrap();
        assert_eq!(rs.rows[0][0], json!(0));
    }

    #[tokio::test]
    async fn test_sqlite_prepare_reports_columns() {
        let mut conn = memory().await;
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[], LIMIT)
            .await
            .unwrap();
        let stmt = conn
            .prepare("SELECT id, name FROM t WHERE id = ?", LIMIT)
            .await
            .unwrap();
        assert_eq!(stmt.columns, vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_sqlite_statement_error() {
        let mut conn = memory().await;
        let err = conn
            .fetch("SELECT * FROM missing_table", &[], LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Statement { .. }));
    }

    #[tokio::test]
    async fn test_session_rejects_injected_charset() {
        let mut conn = memory().await;
        let session = SessionSettings {
            charset: "utf8; DROP TABLE users".to_string(),
            ..SessionSettings::default()
        };
        let err = conn.apply_session(&session, LIMIT).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_session_is_noop() {
        let mut conn = memory().await;
        conn.apply_session(&SessionSettings::default(), LIMIT)
            .await
            .unwrap();
    }
}
