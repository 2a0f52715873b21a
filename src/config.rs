//! Configuration handling.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables, plus the credential source the connection cache
//! reads host/user/password from.

use crate::error::{DbError, DbResult};
use crate::models::{AccessMode, DatabaseType, ExecutionMode};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Lifetime of a cached connection before it is recreated.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 300;

/// Older lifetime constant. Documented only; never applied implicitly.
pub const LEGACY_TIME_LIMIT_SECS: u64 = 600;

pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";
pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_ENVIRONMENT: &str = "DEFAULT";

/// Host, schema and login for one (environment, schema label, access mode).
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database schema name; for SQLite, the database file path or `:memory:`.
    pub name: String,
    #[serde(default)]
    pub user: String,
    /// Sensitive - never logged
    #[serde(default, skip_serializing)]
    pub pass: String,
    #[serde(default)]
    pub driver: DatabaseType,
}

impl CredentialEntry {
    /// A SQLite entry; `path` is a file path or `:memory:`.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            name: path.into(),
            driver: DatabaseType::SQLite,
            ..Self::default()
        }
    }

    pub fn mysql(
        host: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            name: name.into(),
            user: user.into(),
            pass: pass.into(),
            driver: DatabaseType::MySQL,
        }
    }
}

impl std::fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("pass", &"****")
            .field("driver", &self.driver)
            .finish()
    }
}

/// environment -> schema label -> access mode ("READ"/"WRITE") -> entry
pub type CredentialMap = HashMap<String, HashMap<String, HashMap<String, CredentialEntry>>>;

/// Supplies credentials and environment aliases to the connection cache.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> &CredentialMap;

    /// Target of an environment alias, if one is configured.
    fn location_alias(&self, environment: &str) -> Option<&str>;

    /// Resolve an environment alias; unresolved names pass through unchanged.
    fn resolve_location(&self, environment: &str) -> String {
        self.location_alias(environment)
            .unwrap_or(environment)
            .to_string()
    }

    /// Look up the entry for a fully resolved environment.
    fn lookup(
        &self,
        environment: &str,
        schema: &str,
        access: AccessMode,
    ) -> DbResult<&CredentialEntry> {
        let creds = self.credentials();
        if creds.is_empty() {
            return Err(DbError::configuration(
                "No credentials found. Provide a credentials file with at least one environment",
            ));
        }
        creds
            .get(environment)
            .and_then(|schemas| schemas.get(schema))
            .and_then(|modes| modes.get(access.as_str()))
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "Missing credentials for {}: {} -> {}",
                    environment, schema, access
                ))
            })
    }
}

/// Credentials loaded from a JSON document.
///
/// ```text
/// {
///   "aliases": { "DEFAULT": "LIVE" },
///   "environments": {
///     "LIVE": { "APP": { "READ": {...}, "WRITE": {...} } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub environments: CredentialMap,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse credentials from a JSON string.
    pub fn from_json(json: &str) -> DbResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::configuration(format!("Invalid credentials document: {e}")))
    }

    /// Load credentials from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!(
                "Cannot read credentials file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Register an entry (builder style).
    pub fn with_entry(
        mut self,
        environment: impl Into<String>,
        schema: impl Into<String>,
        access: AccessMode,
        entry: CredentialEntry,
    ) -> Self {
        self.environments
            .entry(environment.into())
            .or_default()
            .entry(schema.into())
            .or_default()
            .insert(access.as_str().to_string(), entry);
        self
    }

    /// Register the same entry for both READ and WRITE.
    pub fn with_read_write(
        self,
        environment: impl Into<String>,
        schema: impl Into<String>,
        entry: CredentialEntry,
    ) -> Self {
        let environment = environment.into();
        let schema = schema.into();
        self.with_entry(environment.clone(), schema.clone(), AccessMode::Read, entry.clone())
            .with_entry(environment, schema, AccessMode::Write, entry)
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> &CredentialMap {
        &self.environments
    }

    fn location_alias(&self, environment: &str) -> Option<&str> {
        self.aliases.get(environment).map(String::as_str)
    }
}

/// Statements run on every freshly opened connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub time_zone: String,
    pub charset: String,
}

impl SessionSettings {
    /// The charset is sent unquoted in `SET NAMES`, so only identifier
    /// characters are accepted.
    pub fn validate(&self) -> DbResult<()> {
        let valid = !self.charset.is_empty()
            && self
                .charset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(DbError::configuration(format!(
                "Invalid charset '{}': expected letters, digits or '_'",
                self.charset
            )))
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

/// Options for the connection cache and the handles it creates.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub mode: ExecutionMode,
    /// A cached connection is reused only while younger than this.
    pub time_limit: Duration,
    pub statement_timeout: Duration,
    pub connect_timeout: Duration,
    pub session: SessionSettings,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Live,
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            session: SessionSettings::default(),
        }
    }
}

impl CacheOptions {
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

/// Command line configuration for the `schema-gate` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "schema-gate",
    about = "Run parameterized statements through the cached, mode-aware data-access layer",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON credentials file
    #[arg(long, value_name = "FILE", env = "SCHEMA_GATE_CREDENTIALS")]
    pub credentials: String,

    /// Execution mode. In debug mode nothing is ever committed.
    #[arg(long, value_enum, default_value = "live", env = "SCHEMA_GATE_MODE")]
    pub mode: ExecutionMode,

    /// Seconds a cached connection may be reused before it is recreated
    #[arg(
        long,
        default_value_t = DEFAULT_TIME_LIMIT_SECS,
        env = "SCHEMA_GATE_TIME_LIMIT"
    )]
    pub time_limit: u64,

    /// Statement timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        env = "SCHEMA_GATE_STATEMENT_TIMEOUT"
    )]
    pub statement_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SCHEMA_GATE_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Session time zone set on every new MySQL connection
    #[arg(long, default_value = DEFAULT_TIME_ZONE, env = "SCHEMA_GATE_TIME_ZONE")]
    pub time_zone: String,

    /// Session character set set on every new MySQL connection
    #[arg(long, default_value = DEFAULT_CHARSET, env = "SCHEMA_GATE_CHARSET")]
    pub charset: String,

    /// Schema label to run against
    #[arg(long, default_value = "APP")]
    pub schema: String,

    /// Environment (or alias) to run against
    #[arg(long, default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,

    /// Always use write connections
    #[arg(long)]
    pub critical: bool,

    /// SQL statement to run
    #[arg(long)]
    pub sql: String,

    /// Positional parameter as a JSON value; repeat for more
    #[arg(long = "param", value_name = "JSON")]
    pub params: Vec<String>,

    /// Run as a write statement and print rows affected
    #[arg(long)]
    pub write: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SCHEMA_GATE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SCHEMA_GATE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            mode: self.mode,
            time_limit: Duration::from_secs(self.time_limit),
            statement_timeout: Duration::from_secs(self.statement_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            session: SessionSettings {
                time_zone: self.time_zone.clone(),
                charset: self.charset.clone(),
            },
        }
    }

    /// Decode the `--param` values.
    pub fn query_params(&self) -> DbResult<Vec<crate::models::QueryParam>> {
        self.params
            .iter()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|e| DbError::invalid_input(format!("Invalid --param '{raw}': {e}")))
            })
            .collect()
    }
}
