//! Positional binding of `QueryParam` lists onto driver queries.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Sqlite};

/// Both drivers accept the same Rust types for every variant, so the binder
/// is written once and stamped out per driver.
macro_rules! bound_query {
    ($name:ident, $q:lifetime, $db:ty, $args:ty) => {
        pub(crate) fn $name<$q>(sql: &$q str, params: &$q [QueryParam]) -> Query<$q, $db, $args> {
            params.iter().fold(sqlx::query(sql), |query, param| match param {
                QueryParam::Null => query.bind(None::<String>),
                QueryParam::Bool(b) => query.bind(*b),
                QueryParam::Int(n) => query.bind(*n),
                QueryParam::Float(f) => query.bind(*f),
                QueryParam::String(s) => query.bind(s.as_str()),
                QueryParam::Bytes(b) => query.bind(b.as_slice()),
            })
        }
    };
}

bound_query!(mysql_query, 'q, MySql, MySqlArguments);
bound_query!(sqlite_query, 'q, Sqlite, SqliteArguments<'q>);
