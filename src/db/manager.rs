//! Per-schema managers and their registry.
//!
//! A `SchemaManager` routes each call to a READ or WRITE handle from the
//! shared [`ConnectionCache`]. Reads are forced onto the WRITE handle when the
//! manager is critical, while it has an active transaction, and always in
//! debug mode.

use crate::db::cache::ConnectionCache;
use crate::db::handle::TransactionalHandle;
use crate::db::statement::UpdateTarget;
use crate::error::{DbError, DbResult};
use crate::models::{
    AccessMode, ExecuteResult, PreparedStatement, QueryParam, Record, ResultSet, Row,
};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Factory and owner of every `SchemaManager` in the process.
pub struct ManagerRegistry {
    cache: Arc<ConnectionCache>,
    managers: RwLock<HashMap<String, Arc<SchemaManager>>>,
}

impl ManagerRegistry {
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self {
            cache,
            managers: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Get or create the manager for these arguments.
    ///
    /// `environment` defaults to `DEFAULT`. In debug mode a new manager opens
    /// its outer transaction before it is returned.
    pub async fn instance(
        &self,
        schema: &str,
        environment: Option<&str>,
        critical: bool,
        discriminator: Option<&str>,
    ) -> DbResult<Arc<SchemaManager>> {
        let (environment, schema) = self.normalize(schema, environment);
        let mut key = format!("{}_{}_{}", environment, schema, u8::from(critical));
        if let Some(discriminator) = discriminator {
            key.push('_');
            key.push_str(discriminator);
        }

        {
            let managers = self.managers.read().await;
            if let Some(manager) = managers.get(&key) {
                return Ok(Arc::clone(manager));
            }
        }

        // Held across construction so the debug-mode transaction opens once
        let mut managers = self.managers.write().await;
        if let Some(manager) = managers.get(&key) {
            return Ok(Arc::clone(manager));
        }

        let manager = Arc::new(SchemaManager {
            cache: Arc::clone(&self.cache),
            environment,
            schema: RwLock::new(schema),
            critical,
            discriminator: discriminator.map(str::to_string),
            active_transaction: AtomicBool::new(false),
        });
        if self.cache.mode().is_debug() {
            manager.begin_transaction().await?;
        }

        info!(key = %key, critical = critical, "Schema manager created");
        managers.insert(key, Arc::clone(&manager));
        Ok(manager)
    }

    /// Drop one cached live-mode connection. Names are normalized the same
    /// way as in [`instance`](Self::instance).
    pub async fn forget(
        &self,
        schema: &str,
        environment: Option<&str>,
        access: AccessMode,
        discriminator: Option<&str>,
    ) {
        let (environment, schema) = self.normalize(schema, environment);
        self.cache
            .forget_connection(&schema, &environment, access, discriminator)
            .await;
    }

    /// Resolve the environment alias, then upper-case both labels.
    fn normalize(&self, schema: &str, environment: Option<&str>) -> (String, String) {
        let environment = self
            .cache
            .resolve_location(environment.unwrap_or(crate::config::DEFAULT_ENVIRONMENT))
            .to_uppercase();
        (environment, schema.to_uppercase())
    }

    /// Drop every cached live-mode connection.
    pub async fn forget_all(&self) {
        self.cache.forget_all_connections().await;
    }

    pub async fn manager_count(&self) -> usize {
        self.managers.read().await.len()
    }
}

/// Facade over the READ and WRITE handles of one schema label.
pub struct SchemaManager {
    cache: Arc<ConnectionCache>,
    environment: String,
    schema: RwLock<String>,
    critical: bool,
    discriminator: Option<String>,
    active_transaction: AtomicBool,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("environment", &self.environment)
            .field("critical", &self.critical)
            .field("discriminator", &self.discriminator)
            .finish_non_exhaustive()
    }
}

impl SchemaManager {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    pub fn has_active_transaction(&self) -> bool {
        self.active_transaction.load(Ordering::SeqCst)
    }

    pub async fn schema_label(&self) -> String {
        self.schema.read().await.clone()
    }

    /// Replace the default schema label. An empty label disables the manager.
    pub async fn set_schema_label(&self, label: impl Into<String>) {
        *self.schema.write().await = label.into();
    }

    /// Access mode actually used for a request.
    pub fn effective_access(&self, requested: AccessMode) -> AccessMode {
        if self.critical || self.has_active_transaction() || self.cache.mode().is_debug() {
            AccessMode::Write
        } else {
            requested
        }
    }

    /// Route a request to a cached handle.
    ///
    /// Fails with `NoConnection` when neither `schema_override` nor the
    /// manager's own label names a schema.
    pub async fn get_conn(
        &self,
        requested: AccessMode,
        schema_override: Option<&str>,
    ) -> DbResult<Arc<TransactionalHandle>> {
        let schema = match schema_override.filter(|s| !s.is_empty()) {
            Some(schema) => schema.to_string(),
            None => self.schema_label().await,
        };
        if schema.is_empty() {
            return Err(DbError::no_connection(schema));
        }

        let access = self.effective_access(requested);
        if access != requested {
            debug!(schema = %schema, requested = %requested, "Routing to WRITE connection");
        }
        self.cache
            .get_connection(
                &self.environment,
                &schema,
                access,
                self.discriminator.as_deref(),
            )
            .await
    }

    async fn read(&self) -> DbResult<Arc<TransactionalHandle>> {
        self.get_conn(AccessMode::Read, None).await
    }

    async fn write(&self) -> DbResult<Arc<TransactionalHandle>> {
        self.get_conn(AccessMode::Write, None).await
    }

    pub async fn begin_transaction(&self) -> DbResult<u32> {
        self.active_transaction.store(true, Ordering::SeqCst);
        self.write().await?.begin_transaction().await
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.active_transaction.store(false, Ordering::SeqCst);
        self.write().await?.commit().await
    }

    pub async fn roll_back(&self) -> DbResult<()> {
        self.active_transaction.store(false, Ordering::SeqCst);
        self.write().await?.roll_back().await
    }

    pub async fn last_insert_id(&self) -> DbResult<u64> {
        Ok(self.write().await?.last_insert_id().await)
    }

    pub async fn query_prepared(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteResult> {
        self.write().await?.query_prepared(sql, params).await
    }

    pub async fn prepare(&self, sql: &str) -> DbResult<PreparedStatement> {
        self.write().await?.prepare(sql).await
    }

    pub async fn insert(&self, table: &str, values: &Record) -> DbResult<u64> {
        self.write().await?.insert(table, values).await
    }

    pub async fn multi_insert(&self, table: &str, rows: &[Record]) -> DbResult<u64> {
        self.write().await?.multi_insert(table, rows).await
    }

    pub async fn update(
        &self,
        table: &str,
        values: &Record,
        target: impl Into<UpdateTarget>,
        id_field: &str,
    ) -> DbResult<u64> {
        self.write()
            .await?
            .update(table, values, target, id_field)
            .await
    }

    pub async fn fetch_none(&self, sql: &str, params: &[QueryParam]) -> DbResult<ResultSet> {
        self.read().await?.fetch_none(sql, params).await
    }

    pub async fn fetch_one(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<JsonValue>> {
        self.read().await?.fetch_one(sql, params).await
    }

    pub async fn fetch_one_strict(
        &self,
        sql: &str,
        params: &[QueryParam],
        error_msg: &str,
    ) -> DbResult<JsonValue> {
        self.read()
            .await?
            .fetch_one_strict(sql, params, error_msg)
            .await
    }

    pub async fn fetch_row(&self, sql: &str, params: &[QueryParam]) -> DbResult<Option<Row>> {
        self.read().await?.fetch_row(sql, params).await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.read().await?.fetch_all(sql, params).await
    }

    pub async fn fetch_column(
        &self,
        sql: &str,
        params: &[QueryParam],
        column: usize,
    ) -> DbResult<Vec<JsonValue>> {
        self.read().await?.fetch_column(sql, params, column).await
    }

    pub async fn fetch_all_as_dictionary(
        &self,
        sql: &str,
        params: &[QueryParam],
        key_column: usize,
    ) -> DbResult<BTreeMap<String, Vec<JsonValue>>> {
        self.read()
            .await?
            .fetch_all_as_dictionary(sql, params, key_column)
            .await
    }
}
