//! Row decoding.
//!
//! Rows coming back from a driver are decoded into positional JSON values.
//! MySQL reports a reliable declared type per column, so its values are
//! decoded by [`TypeCategory`]. SQLite is dynamically typed; each value is
//! classified by its runtime storage class instead.

use crate::models::{DatabaseType, ResultSet};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Null,
    Unknown,
}

/// Classify a declared type (or SQLite storage class) name.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    match lower.as_str() {
        "null" => TypeCategory::Null,
        "numeric" if db == DatabaseType::SQLite => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "json" => TypeCategory::Json,
        "real" => TypeCategory::Float,
        _ if has("decimal") || has("numeric") => TypeCategory::Decimal,
        // before "int": TINYBLOB, TINYTEXT
        _ if has("blob") || has("binary") => TypeCategory::Binary,
        _ if has("char") || has("text") => TypeCategory::Text,
        _ if has("int") || has("serial") => TypeCategory::Integer,
        _ if has("float") || has("double") => TypeCategory::Float,
        _ if db == DatabaseType::MySQL && (has("date") || has("time")) => TypeCategory::Temporal,
        // enum, set...
        _ => TypeCategory::Unknown,
    }
}

/// Binary data as JSON: valid UTF-8 as a plain string, anything else base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Decoding of driver rows into positional JSON values.
pub trait RowToJson {
    fn column_names(&self) -> Vec<String>;
    fn to_json_values(&self) -> Vec<JsonValue>;
}

impl RowToJson for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_values(&self) -> Vec<JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| mysql::decode_column(self, idx, col.type_info().name()))
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_values(&self) -> Vec<JsonValue> {
        (0..self.columns().len())
            .map(|idx| sqlite::decode_column(self, idx))
            .collect()
    }
}

/// Decode a batch of rows. Column names come from the first row, so an
/// empty batch has no columns.
pub fn to_result_set<R: RowToJson>(rows: &[R]) -> ResultSet {
    ResultSet {
        columns: rows.first().map(|r| r.column_names()).unwrap_or_default(),
        rows: rows.iter().map(|r| r.to_json_values()).collect(),
    }
}

mod mysql {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    /// Decode one column; a value that fails to decode becomes `null`.
    pub fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
        let value = match categorize_type(type_name, DatabaseType::MySQL) {
            TypeCategory::Null => return JsonValue::Null,
            TypeCategory::Integer if type_name.to_lowercase().contains("unsigned") => row
                .try_get::<Option<u64>, _>(idx)
                .map(|v| v.map(JsonValue::from)),
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .map(|v| v.map(JsonValue::from)),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(JsonValue::Bool)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(|bytes| decode_binary_value(&bytes))),
            TypeCategory::Json => row.try_get_unchecked::<Option<String>, _>(idx).map(|v| {
                v.map(|s| serde_json::from_str(&s).unwrap_or(JsonValue::String(s)))
            }),
            TypeCategory::Temporal => Ok(decode_temporal(row, idx)),
            // DECIMAL travels as text to keep its exact representation
            TypeCategory::Decimal | TypeCategory::Text | TypeCategory::Unknown => row
                .try_get_unchecked::<Option<String>, _>(idx)
                .map(|v| v.map(JsonValue::String)),
        };

        match value {
            Ok(v) => v.unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::error!(column = idx, type_name = %type_name, error = ?e, "Failed to decode column");
                JsonValue::Null
            }
        }
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => Ok(v.map(float_value)),
            Err(_) => row
                .try_get::<Option<f32>, _>(idx)
                .map(|v| v.map(|f| float_value(f64::from(f)))),
        }
    }

    /// DATETIME/TIMESTAMP render as `YYYY-MM-DD HH:MM:SS`; DATE and TIME as
    /// their ISO forms.
    fn decode_temporal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v.map(|dt| JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v.map(|d| JsonValue::String(d.to_string()));
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v.map(|t| JsonValue::String(t.to_string()));
        }
        row.try_get_unchecked::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize) -> JsonValue {
        let storage_class = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => return JsonValue::Null,
        };

        let value = match categorize_type(&storage_class, DatabaseType::SQLite) {
            TypeCategory::Integer => row.try_get_unchecked::<i64, _>(idx).map(JsonValue::from),
            TypeCategory::Float | TypeCategory::Decimal => {
                row.try_get_unchecked::<f64, _>(idx).map(float_value)
            }
            TypeCategory::Binary => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|bytes| decode_binary_value(&bytes)),
            _ => row.try_get_unchecked::<String, _>(idx).map(JsonValue::String),
        };
        value.unwrap_or(JsonValue::Null)
    }
}
