//! schema-gate
//!
//! A data-access layer for MySQL and SQLite: a time-boxed connection cache,
//! per-schema managers that route reads and writes, and handles that enforce
//! mode-dependent nested transactions and build parameterized statements.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{CacheOptions, Config, CredentialEntry, CredentialSource, Credentials};
pub use db::{ConnectionCache, ManagerRegistry, SchemaManager, TransactionalHandle};
pub use error::{DbError, DbResult};
