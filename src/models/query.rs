//! Query-related data models.
//!
//! This module defines bound parameters, literal SQL fragments, the ordered
//! value maps consumed by the statement builders, and the shapes results come
//! back in.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A row shaped as column name -> value.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A raw SQL fragment that is inlined verbatim, with the parameters its own
/// placeholders consume.
///
/// Used both as a column value (`NOW()`, `counter + ?`) and as the condition
/// of an UPDATE (`id IN (?, ?)`). The fragment is never escaped, so it must
/// not be built from untrusted input.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExpression {
    expression: String,
    args: Vec<QueryParam>,
}

impl SqlExpression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(expression: impl Into<String>, args: Vec<QueryParam>) -> Self {
        Self {
            expression: expression.into(),
            args,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn args(&self) -> &[QueryParam] {
        &self.args
    }
}

/// A column value handed to the statement builders.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Sent as a bound `?` parameter.
    Bound(QueryParam),
    /// Inlined into the SQL text; its args are appended in positional order.
    Literal(SqlExpression),
}

impl Value {
    /// Shorthand for a literal fragment without extra parameters.
    pub fn literal(fragment: impl Into<String>) -> Self {
        Self::Literal(SqlExpression::new(fragment))
    }
}

impl From<QueryParam> for Value {
    fn from(v: QueryParam) -> Self {
        Self::Bound(v)
    }
}

macro_rules! impl_bound_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Bound(v.into())
                }
            }
        )+
    };
}

impl_bound_value!(bool, i32, i64, u32, f64, &str, String, Vec<u8>);

impl From<SqlExpression> for Value {
    fn from(expr: SqlExpression) -> Self {
        Self::Literal(expr)
    }
}

/// An ordered column -> value map.
///
/// Column order is preserved between the generated column list and the
/// generated placeholder list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column. Setting an existing column replaces its value in place.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column to a literal SQL fragment.
    pub fn literal(self, column: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.set(column, Value::literal(fragment))
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// One entry of a SELECT field list.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    /// Passed through verbatim.
    Name(String),
    /// `name AS alias`
    Alias { name: String, alias: String },
    /// `expression AS alias`; the parts must be exactly two.
    Expression(Vec<String>),
}

impl From<&str> for FieldSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<(&str, &str)> for FieldSpec {
    fn from((name, alias): (&str, &str)) -> Self {
        Self::Alias {
            name: name.to_string(),
            alias: alias.to_string(),
        }
    }
}

/// Raw, positional result of a statement, before any shaping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shape one positional row as a column name -> value map.
    pub fn row_map(&self, idx: usize) -> Option<Row> {
        self.rows.get(idx).map(|values| {
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect()
        })
    }

    pub fn into_maps(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

/// A statement prepared on a connection, to be executed later with params.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedStatement {
    pub sql: String,
    pub columns: Vec<String>,
    /// None when the driver cannot report it before execution.
    pub parameter_count: Option<usize>,
}
