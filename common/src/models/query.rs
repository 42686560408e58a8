//! SQL query models.
//!
//! Contains the values, parameters, rows and results that flow between the
//! gateway views and the query executor.

use std::sync::Arc;

use base64::Engine;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Value};

/// A single SQLite value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Converts a borrowed engine value. Text that is not valid UTF-8 is
    /// decoded with replacement characters rather than failing the row.
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(n) => SqlValue::Integer(n),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form used by output renderers.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(n) => json!(n),
            SqlValue::Real(f) => json!(f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(bytes) => json!({
                "$base64": true,
                "encoded": base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(n) => write!(f, "{n}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Blob(bytes) => write!(f, "<Binary: {} bytes>", bytes.len()),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(n) => ToSqlOutput::Borrowed(ValueRef::Integer(*n)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

/// Parameters bound to a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParams {
    #[default]
    None,
    /// Bound to `?` placeholders in order.
    Positional(Vec<SqlValue>),
    /// Bound by name to `:name` placeholders. Names the statement does not
    /// reference are ignored.
    Named(Vec<(String, SqlValue)>),
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryParams::None => true,
            QueryParams::Positional(values) => values.is_empty(),
            QueryParams::Named(values) => values.is_empty(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            QueryParams::None => Value::Null,
            QueryParams::Positional(values) => {
                Value::Array(values.iter().map(SqlValue::to_json).collect())
            }
            QueryParams::Named(values) => Value::Object(
                values
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// One row, addressable by column name or position. Column order is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn at(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Stop after the configured maximum and report whether more rows existed.
    pub truncate: bool,
    /// Overrides the process-wide limit. Zero or negative disables the limit.
    pub time_limit_ms: Option<i64>,
    pub page_size: Option<usize>,
    /// Whether engine errors are written to the operator log.
    pub log_errors: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self {
            log_errors: true,
            ..Default::default()
        }
    }

    pub fn truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn time_limit_ms(mut self, limit: i64) -> Self {
        self.time_limit_ms = Some(limit);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn quiet(mut self) -> Self {
        self.log_errors = false;
        self
    }
}

/// A query to run against one logical database.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub database: String,
    pub sql: String,
    pub params: QueryParams,
    pub options: QueryOptions,
}

impl QueryRequest {
    pub fn new(database: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            sql: sql.into(),
            params: QueryParams::None,
            options: QueryOptions::new(),
        }
    }

    pub fn params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a SQL query execution.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// More rows matched than were returned.
    pub truncated: bool,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>, truncated: bool) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            truncated,
            row_count,
        }
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.at(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_is_replaced() {
        let value = SqlValue::from_value_ref(ValueRef::Text(b"ok\xffok"));
        assert_eq!(value, SqlValue::Text("ok\u{fffd}ok".into()));
    }

    #[test]
    fn row_serializes_in_column_order() {
        let columns: Arc<[String]> = vec!["b".to_string(), "a".to_string()].into();
        let row = Row::new(columns, vec![SqlValue::Integer(1), SqlValue::from("x")]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":"x"}"#);
        assert_eq!(row.get("a"), Some(&SqlValue::from("x")));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn blobs_are_base64_encoded() {
        let value = SqlValue::Blob(vec![0, 1, 2]);
        assert_eq!(value.to_json()["encoded"], "AAEC");
    }

    #[test]
    fn named_params_to_json() {
        let params = QueryParams::Named(vec![("id".into(), SqlValue::Integer(3))]);
        assert_eq!(params.to_json(), json!({"id": 3}));
        assert!(QueryParams::Positional(vec![]).is_empty());
    }
}
