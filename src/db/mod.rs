//! Database access layer.
//!
//! - `cache`: time-boxed connection cache with live and debug key spaces
//! - `manager`: per-schema facades and the registry that creates them
//! - `handle`: nested-transaction accounting and statement helpers
//! - `transaction`: the NONE/OPEN/NESTED state machine
//! - `statement`: INSERT/UPDATE/field-list builders
//! - `raw`: driver connections, parameter binding and row decoding

pub mod cache;
pub mod handle;
pub mod manager;
pub mod params;
pub mod raw;
pub mod statement;
pub mod transaction;
pub mod types;

pub use cache::{CacheKey, ConnectionCache, ConnectionMetadata};
pub use handle::TransactionalHandle;
pub use manager::{ManagerRegistry, SchemaManager};
pub use raw::RawConnection;
pub use statement::{Statement, UpdateTarget};
pub use transaction::{TxAction, TxState};
