//! Time-boxed connection cache.
//!
//! Handles are cached per `environment_schema_MODE[_discriminator]` key and
//! reused while younger than the configured time limit. Live and debug mode
//! use separate key spaces; only the live space can be forgotten.

use crate::config::{CacheOptions, CredentialSource};
use crate::db::handle::TransactionalHandle;
use crate::error::DbResult;
use crate::models::{AccessMode, ExecutionMode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Identity of a cached connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub environment: String,
    pub schema: String,
    pub access: AccessMode,
    pub discriminator: Option<String>,
}

impl CacheKey {
    pub fn new(
        environment: impl Into<String>,
        schema: impl Into<String>,
        access: AccessMode,
        discriminator: Option<&str>,
    ) -> Self {
        Self {
            environment: environment.into(),
            schema: schema.into(),
            access,
            discriminator: discriminator.map(str::to_string),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.environment, self.schema, self.access)?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, "_{}", discriminator)?;
        }
        Ok(())
    }
}

struct CachedConnection {
    handle: Arc<TransactionalHandle>,
    created_at: Instant,
}

/// Cached connection information (no handles or secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetadata {
    pub key: String,
    pub handle_id: String,
    pub mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
    pub age_secs: u64,
    pub expired: bool,
}

/// Process-wide connection cache.
pub struct ConnectionCache {
    credentials: Arc<dyn CredentialSource>,
    options: CacheOptions,
    live: RwLock<HashMap<String, CachedConnection>>,
    debug: RwLock<HashMap<String, CachedConnection>>,
    /// `list_connections` maps `Instant`s to wall time through this pair
    instant_anchor: Instant,
    wall_anchor: DateTime<Utc>,
}

impl ConnectionCache {
    pub fn new(credentials: Arc<dyn CredentialSource>, options: CacheOptions) -> Self {
        Self {
            credentials,
            options,
            live: RwLock::new(HashMap::new()),
            debug: RwLock::new(HashMap::new()),
            instant_anchor: Instant::now(),
            wall_anchor: Utc::now(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.options.mode
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Resolve an environment alias to the environment it stands for.
    pub fn resolve_location(&self, environment: &str) -> String {
        self.credentials.resolve_location(environment)
    }

    fn space(&self) -> &RwLock<HashMap<String, CachedConnection>> {
        match self.options.mode {
            ExecutionMode::Live => &self.live,
            ExecutionMode::Debug => &self.debug,
        }
    }

    /// Broken handles are always replaced. Debug-space handles never age out:
    /// they carry the outer transaction their managers opened, and a
    /// replacement would start without one.
    fn is_fresh(&self, entry: &CachedConnection) -> bool {
        if entry.handle.is_broken() {
            return false;
        }
        self.options.mode.is_debug() || entry.created_at.elapsed() < self.options.time_limit
    }

    /// Get the cached handle for a key, opening a new one on miss or expiry.
    pub async fn get_connection(
        &self,
        environment: &str,
        schema: &str,
        access: AccessMode,
        discriminator: Option<&str>,
    ) -> DbResult<Arc<TransactionalHandle>> {
        let location = self.resolve_location(environment);
        let entry = self.credentials.lookup(&location, schema, access)?;
        let key = CacheKey::new(location.as_str(), schema, access, discriminator).to_string();
        let space = self.space();

        {
            let cached = space.read().await;
            if let Some(existing) = cached.get(&key).filter(|c| self.is_fresh(c)) {
                return Ok(Arc::clone(&existing.handle));
            }
        }

        info!(
            key = %key,
            driver = %entry.driver,
            mode = %self.options.mode,
            "Opening database connection"
        );
        let handle = Arc::new(TransactionalHandle::open(entry, &self.options).await?);

        // Re-check after async work; a concurrent caller may have stored one
        let mut cached = space.write().await;
        if let Some(existing) = cached.get(&key).filter(|c| self.is_fresh(c)) {
            debug!(key = %key, "Concurrent connection attempt detected, reusing stored handle");
            return Ok(Arc::clone(&existing.handle));
        }
        if let Some(stale) = cached.get(&key) {
            if stale.handle.is_broken() {
                warn!(key = %key, handle = %stale.handle.id(), "Replacing broken connection");
            } else {
                info!(key = %key, "Cached connection expired, replacing");
            }
        }
        cached.insert(
            key.clone(),
            CachedConnection {
                handle: Arc::clone(&handle),
                created_at: Instant::now(),
            },
        );
        info!(key = %key, handle = %handle.id(), "Connection cached");
        Ok(handle)
    }

    /// Remove one live-mode entry. Missing entries are ignored.
    pub async fn forget_connection(
        &self,
        schema: &str,
        environment: &str,
        access: AccessMode,
        discriminator: Option<&str>,
    ) {
        let location = self.resolve_location(environment);
        let key = CacheKey::new(location, schema, access, discriminator).to_string();
        if self.live.write().await.remove(&key).is_some() {
            info!(key = %key, "Forgot cached connection");
        }
    }

    /// Clear the live-mode key space. Debug-mode entries are kept.
    pub async fn forget_all_connections(&self) {
        let mut live = self.live.write().await;
        let count = live.len();
        live.clear();
        info!(count = count, "Forgot all cached connections");
    }

    /// List entries of the active key space.
    pub async fn list_connections(&self) -> Vec<ConnectionMetadata> {
        let cached = self.space().read().await;
        let mut list: Vec<ConnectionMetadata> = cached
            .iter()
            .map(|(key, entry)| {
                let since_anchor = entry.created_at.duration_since(self.instant_anchor);
                ConnectionMetadata {
                    key: key.clone(),
                    handle_id: entry.handle.id().to_string(),
                    mode: self.options.mode,
                    created_at: self.wall_anchor + since_anchor,
                    age_secs: entry.created_at.elapsed().as_secs(),
                    expired: !self.is_fresh(entry),
                }
            })
            .collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    /// Number of entries in the active key space.
    pub async fn connection_count(&self) -> usize {
        self.space().read().await.len()
    }
}
