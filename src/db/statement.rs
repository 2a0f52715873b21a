//! Statement builders for INSERT, multi-row INSERT and UPDATE.
//!
//! Values are always bound as positional `?` parameters unless the caller
//! explicitly wraps them in a [`Value::Literal`], in which case the fragment
//! is inlined and its own arguments are appended in order.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, FieldSpec, QueryParam, Record, SqlExpression, Value};
use tracing::warn;

/// SQL text plus the parameters its placeholders consume, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Which rows an UPDATE touches.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateTarget {
    /// `<id_field> = ?`
    Id(QueryParam),
    /// An arbitrary WHERE condition with its own parameters.
    Condition(SqlExpression),
}

impl From<SqlExpression> for UpdateTarget {
    fn from(expr: SqlExpression) -> Self {
        Self::Condition(expr)
    }
}

impl From<QueryParam> for UpdateTarget {
    fn from(id: QueryParam) -> Self {
        Self::Id(id)
    }
}

macro_rules! impl_update_target {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for UpdateTarget {
                fn from(id: $ty) -> Self {
                    Self::Id(id.into())
                }
            }
        )+
    };
}

impl_update_target!(i32, i64, u32, &str, String);

/// Push the placeholder for one value and collect its parameters.
fn placeholder(table: &str, column: &str, value: &Value, params: &mut Vec<QueryParam>) -> String {
    match value {
        Value::Bound(param) => {
            params.push(param.clone());
            "?".to_string()
        }
        Value::Literal(expr) => {
            warn!(
                table = %table,
                column = %column,
                fragment = %expr.expression(),
                "Inlining literal SQL fragment"
            );
            params.extend_from_slice(expr.args());
            expr.expression().to_string()
        }
    }
}

fn column_list(db: DatabaseType, columns: impl Iterator<Item = impl AsRef<str>>) -> String {
    columns
        .map(|c| db.quote_identifier(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a single-row INSERT.
pub fn insert(db: DatabaseType, table: &str, values: &Record) -> DbResult<Statement> {
    if values.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Cannot insert into '{}' without any values",
            table
        )));
    }

    let mut params = Vec::with_capacity(values.len());
    let placeholders: Vec<String> = values
        .iter()
        .map(|(column, value)| placeholder(table, column, value, &mut params))
        .collect();

    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            column_list(db, values.columns()),
            placeholders.join(", ")
        ),
        params,
    })
}

/// Build one INSERT carrying a value tuple per row.
///
/// The column list comes from the first row; every other row must name the
/// same columns in the same order.
pub fn multi_insert(db: DatabaseType, table: &str, rows: &[Record]) -> DbResult<Statement> {
    let first = rows.first().ok_or_else(|| {
        DbError::invalid_input(format!("Cannot insert into '{}' without any rows", table))
    })?;
    if first.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Cannot insert into '{}' without any values",
            table
        )));
    }

    let columns: Vec<&str> = first.columns().collect();
    let mut params = Vec::with_capacity(columns.len() * rows.len());
    let mut tuples = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        if !row.columns().eq(columns.iter().copied()) {
            return Err(DbError::invalid_input(format!(
                "Row {} has columns ({}) but the first row has ({})",
                idx,
                row.columns().collect::<Vec<_>>().join(", "),
                columns.join(", ")
            )));
        }
        let placeholders: Vec<String> = row
            .iter()
            .map(|(column, value)| placeholder(table, column, value, &mut params))
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    Ok(Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            column_list(db, columns.iter()),
            tuples.join(", ")
        ),
        params,
    })
}

/// Build an UPDATE. Parameters are the SET values followed by the target's.
pub fn update(
    table: &str,
    values: &Record,
    target: &UpdateTarget,
    id_field: &str,
) -> DbResult<Statement> {
    if values.is_empty() {
        return Err(DbError::invalid_input(format!(
            "Cannot update '{}' without any values",
            table
        )));
    }

    let mut params = Vec::with_capacity(values.len() + 1);
    let pairs: Vec<String> = values
        .iter()
        .map(|(column, value)| format!("{}={}", column, placeholder(table, column, value, &mut params)))
        .collect();

    let condition = match target {
        UpdateTarget::Id(id) => {
            params.push(id.clone());
            format!("{} = ?", id_field)
        }
        UpdateTarget::Condition(expr) => {
            params.extend_from_slice(expr.args());
            expr.expression().to_string()
        }
    };

    Ok(Statement {
        sql: format!("UPDATE {} SET {} WHERE {}", table, pairs.join(", "), condition),
        params,
    })
}

/// Build a SELECT field list. An empty list selects everything.
pub fn generate_sql_fields(fields: &[FieldSpec]) -> DbResult<String> {
    if fields.is_empty() {
        return Ok("*".to_string());
    }

    let mut clauses = Vec::with_capacity(fields.len());
    for field in fields {
        match field {
            FieldSpec::Name(name) => clauses.push(name.clone()),
            FieldSpec::Alias { name, alias } => clauses.push(format!("{} AS {}", name, alias)),
            FieldSpec::Expression(parts) => match parts.as_slice() {
                [expr, alias] => clauses.push(format!("{} AS {}", expr, alias)),
                _ => {
                    return Err(DbError::invalid_input(
                        "Invalid field tuple: must be exactly two items",
                    ));
                }
            },
        }
    }
    Ok(clauses.join(", "))
}
