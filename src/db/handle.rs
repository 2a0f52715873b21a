//! Transaction-aware database handle.
//!
//! A `TransactionalHandle` owns one physical connection. It layers the
//! mode-dependent nesting rules from [`crate::db::transaction`] and the
//! statement builders from [`crate::db::statement`] on top of it. All work on
//! a handle is serialized; concurrent callers sharing a handle also share its
//! transaction state.

use crate::config::{CacheOptions, CredentialEntry};
use crate::db::raw::RawConnection;
use crate::db::statement::{self, Statement, UpdateTarget};
use crate::db::transaction::{TxAction, TxState};
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseType, ExecuteResult, ExecutionMode, FieldSpec, PreparedStatement, QueryParam, Record,
    ResultSet, Row,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct HandleState {
    conn: RawConnection,
    tx: TxState,
    last_insert_id: u64,
}

pub struct TransactionalHandle {
    id: String,
    mode: ExecutionMode,
    db_type: DatabaseType,
    statement_timeout: Duration,
    /// Set when a physical transaction statement timed out; the server-side
    /// transaction state is then unknown.
    broken: AtomicBool,
    state: Mutex<HandleState>,
}

impl std::fmt::Debug for TransactionalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalHandle")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

impl TransactionalHandle {
    /// Connect and apply the session settings from `options`.
    pub async fn open(entry: &CredentialEntry, options: &CacheOptions) -> DbResult<Self> {
        let mut conn = RawConnection::connect(entry, options).await?;
        conn.apply_session(&options.session, options.statement_timeout)
            .await?;
        Ok(Self::new(conn, options.mode, options.statement_timeout))
    }

    /// Wrap an already open connection.
    pub fn new(conn: RawConnection, mode: ExecutionMode, statement_timeout: Duration) -> Self {
        let db_type = conn.db_type();
        Self {
            id: generate_handle_id(),
            mode,
            db_type,
            statement_timeout,
            broken: AtomicBool::new(false),
            state: Mutex::new(HandleState {
                conn,
                tx: TxState::None,
                last_insert_id: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// A broken handle is no longer handed out by the cache.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub async fn transaction_state(&self) -> TxState {
        self.state.lock().await.tx
    }

    pub async fn transaction_depth(&self) -> u32 {
        self.state.lock().await.tx.depth()
    }

    /// Start a transaction, or a logical nested one in debug mode.
    ///
    /// Returns the new depth.
    pub async fn begin_transaction(&self) -> DbResult<u32> {
        let mut state = self.state.lock().await;
        let transition = state.tx.begin(self.mode)?;
        self.apply_action(&mut state, transition.action).await?;
        state.tx = transition.next;
        debug!(handle = %self.id, depth = state.tx.depth(), "Transaction started");
        Ok(state.tx.depth())
    }

    pub async fn commit(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let transition = state.tx.commit(self.mode)?;
        self.apply_action(&mut state, transition.action).await?;
        state.tx = transition.next;
        debug!(handle = %self.id, depth = state.tx.depth(), "Transaction committed");
        Ok(())
    }

    pub async fn roll_back(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let transition = state.tx.rollback(self.mode)?;
        self.apply_action(&mut state, transition.action).await?;
        state.tx = transition.next;
        debug!(handle = %self.id, depth = state.tx.depth(), "Transaction rolled back");
        Ok(())
    }

    async fn apply_action(&self, state: &mut HandleState, action: Option<TxAction>) -> DbResult<()> {
        let limit = self.statement_timeout;
        let result = match action {
            Some(TxAction::Begin) => state.conn.begin(limit).await,
            Some(TxAction::Commit) => state.conn.commit(limit).await,
            Some(TxAction::Rollback) => state.conn.rollback(limit).await,
            None => return Ok(()),
        };
        if let Err(DbError::Timeout { .. }) = &result {
            self.broken.store(true, Ordering::SeqCst);
            warn!(
                handle = %self.id,
                action = ?action,
                state = %state.tx,
                "Transaction statement timed out, handle marked broken"
            );
        }
        result
    }

    /// Execute a statement with positional parameters.
    pub async fn query_prepared(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteResult> {
        let mut state = self.state.lock().await;
        debug!(handle = %self.id, sql = %sql, params = params.len(), "Executing statement");
        let result = state
            .conn
            .execute(sql, params, self.statement_timeout)
            .await?;
        if result.last_insert_id != 0 {
            state.last_insert_id = result.last_insert_id;
        }
        Ok(result)
    }

    /// Run a statement and return its result set without shaping it.
    pub async fn fetch_none(&self, sql: &str, params: &[QueryParam]) -> DbResult<ResultSet> {
        let mut state = self.state.lock().await;
        debug!(handle = %self.id, sql = %sql, params = params.len(), "Executing query");
        state.conn.fetch(sql, params, self.statement_timeout).await
    }

    /// First column of the first row, if any.
    pub async fn fetch_one(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<JsonValue>> {
        let rs = self.fetch_none(sql, params).await?;
        Ok(rs.rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }

    /// Like [`fetch_one`](Self::fetch_one), but a missing row is an error
    /// carrying `error_msg` and a backtrace.
    pub async fn fetch_one_strict(
        &self,
        sql: &str,
        params: &[QueryParam],
        error_msg: &str,
    ) -> DbResult<JsonValue> {
        self.fetch_one(sql, params)
            .await?
            .ok_or_else(|| DbError::row_not_found(format!("{}: no rows found", error_msg)))
    }

    pub async fn fetch_row(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        let rs = self.fetch_none(sql, params).await?;
        Ok(rs.row_map(0))
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        Ok(self.fetch_none(sql, params).await?.into_maps())
    }

    /// Every value of one column.
    pub async fn fetch_column(
        &self,
        sql: &str,
        params: &[QueryParam],
        column: usize,
    ) -> DbResult<Vec<JsonValue>> {
        let rs = self.fetch_none(sql, params).await?;
        if !rs.columns.is_empty() && column >= rs.columns.len() {
            return Err(DbError::invalid_input(format!(
                "Column index {} out of range ({} columns)",
                column,
                rs.columns.len()
            )));
        }
        Ok(rs
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().nth(column))
            .collect())
    }

    /// Group rows by the value of `key_column`; each group collects the first
    /// other column.
    pub async fn fetch_all_as_dictionary(
        &self,
        sql: &str,
        params: &[QueryParam],
        key_column: usize,
    ) -> DbResult<BTreeMap<String, Vec<JsonValue>>> {
        let rs = self.fetch_none(sql, params).await?;
        if rs.columns.is_empty() {
            return Ok(BTreeMap::new());
        }
        if key_column >= rs.columns.len() {
            return Err(DbError::invalid_input(format!(
                "Key column index {} out of range ({} columns)",
                key_column,
                rs.columns.len()
            )));
        }
        let value_column = (0..rs.columns.len()).find(|idx| *idx != key_column);

        let mut groups: BTreeMap<String, Vec<JsonValue>> = BTreeMap::new();
        for row in rs.rows {
            let key = match &row[key_column] {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            let value = value_column
                .map(|idx| row[idx].clone())
                .unwrap_or(JsonValue::Null);
            groups.entry(key).or_default().push(value);
        }
        Ok(groups)
    }

    /// Insert one row and return its id.
    pub async fn insert(&self, table: &str, values: &Record) -> DbResult<u64> {
        let stmt = statement::insert(self.db_type, table, values)?;
        Ok(self.run(&stmt).await?.last_insert_id)
    }

    /// Insert several rows in one statement and return the rows affected.
    pub async fn multi_insert(&self, table: &str, rows: &[Record]) -> DbResult<u64> {
        let stmt = statement::multi_insert(self.db_type, table, rows)?;
        Ok(self.run(&stmt).await?.rows_affected)
    }

    /// Update rows matched by id (in `id_field`) or by a condition.
    pub async fn update(
        &self,
        table: &str,
        values: &Record,
        target: impl Into<UpdateTarget>,
        id_field: &str,
    ) -> DbResult<u64> {
        let stmt = statement::update(table, values, &target.into(), id_field)?;
        Ok(self.run(&stmt).await?.rows_affected)
    }

    pub async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
        let mut state = self.state.lock().await;
        state.conn.prepare(sql, self.statement_timeout).await
    }

    /// Id generated by the most recent INSERT on this handle.
    pub async fn last_insert_id(&self) -> u64 {
        self.state.lock().await.last_insert_id
    }

    pub fn generate_sql_fields(fields: &[FieldSpec]) -> DbResult<String> {
        statement::generate_sql_fields(fields)
    }

    async fn run(&self, stmt: &Statement) -> DbResult<ExecuteResult> {
        self.query_prepared(&stmt.sql, &stmt.params).await
    }
}

impl Drop for TransactionalHandle {
    fn drop(&mut self) {
        debug!(handle = %self.id, "Database handle released");
    }
}

/// Generate a unique handle ID.
fn generate_handle_id() -> String {
    format!("conn_{}", uuid::Uuid::new_v4().simple())
}
