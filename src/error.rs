//! Error types for the data-access layer.
//!
//! Configuration and transaction-sequencing errors are never absorbed by the
//! layer; they always reach the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Transaction error: {message} (depth: {depth})")]
    TransactionState { message: String, depth: u32 },

    #[error("No connection available for schema '{schema}'")]
    NoConnection { schema: String },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{message}\nBacktrace:\n{backtrace}")]
    RowNotFound { message: String, backtrace: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transaction state error.
    pub fn transaction_state(message: impl Into<String>, depth: u32) -> Self {
        Self::TransactionState {
            message: message.into(),
            depth,
        }
    }

    /// Create a no connection error.
    pub fn no_connection(schema: impl Into<String>) -> Self {
        Self::NoConnection {
            schema: schema.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a row-not-found error carrying a snapshot of the call stack.
    pub fn row_not_found(message: impl Into<String>) -> Self {
        Self::RowNotFound {
            message: message.into(),
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// True when the operation was skipped because no schema label was known.
    pub fn is_no_connection(&self) -> bool {
        matches!(self, Self::NoConnection { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Driver errors split into two families: anything that says the link to the
/// server is unhealthy becomes `Connection`, everything else is a failure of
/// the statement that was running.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;

        match err {
            E::Database(db_err) => {
                DbError::statement(db_err.message(), db_err.code().map(|c| c.into_owned()))
            }
            E::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the credential entry for this environment and schema",
            ),
            E::Io(io) => DbError::connection(
                format!("Socket error: {io}"),
                "Is the server up and reachable from this host?",
            ),
            E::Tls(tls) => DbError::connection(
                format!("TLS handshake failed: {tls}"),
                "Check the server certificate setup",
            ),
            E::Protocol(msg) => DbError::connection(
                format!("Unexpected server reply: {msg}"),
                "The server speaks a protocol version this driver does not support",
            ),
            E::WorkerCrashed => DbError::connection(
                "Driver worker stopped",
                "The connection will be replaced on its next expiry; forget it to reconnect now",
            ),
            E::ColumnIndexOutOfBounds { index, len } => {
                DbError::invalid_input(format!("Column {index} requested but row has {len}"))
            }
            E::RowNotFound => DbError::statement("Statement returned no rows", None),
            E::ColumnNotFound(col) => DbError::statement(format!("No column named {col}"), None),
            E::ColumnDecode { index, source } => {
                DbError::statement(format!("Could not read column {index}: {source}"), None)
            }
            other => DbError::statement(other.to_string(), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
