//! Data models shared by the cache, the handles and the managers.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{AccessMode, DatabaseType, ExecutionMode};
pub use query::{
    ExecuteResult, FieldSpec, PreparedStatement, QueryParam, Record, ResultSet, Row,
    SqlExpression, Value,
};
