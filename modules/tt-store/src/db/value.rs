//! Column values and rows as they travel between callers and SQLite.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

use crate::error::{StoreError, StoreResult};

/// Textual form of every stored date/time (seconds granularity, UTC).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A row keyed by column name.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    DateTime(DateTime<Utc>),
    /// Lists and mappings; written as JSON text
    Json(serde_json::Value),
}

static NULL_VALUE: Value = Value::Null;

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Accepts both `2014-01-02 03:04:05` and `2014-01-02T03:04:05`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as it is bound to a statement: dates and JSON become text.
    pub fn stored(&self) -> Value {
        match self {
            Value::DateTime(dt) => Value::Text(format_datetime(dt)),
            Value::Json(j) => Value::Text(j.to_string()),
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(v) => serde_json::Value::from(*v),
            Value::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => serde_json::Value::from(b.clone()),
            Value::DateTime(dt) => serde_json::Value::String(format_datetime(dt)),
            Value::Json(j) => j.clone(),
        }
    }

    pub(crate) fn from_sql_ref(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::DateTime(dt) => ToSqlOutput::Owned(SqlValue::Text(format_datetime(dt))),
            Value::Json(j) => ToSqlOutput::Owned(SqlValue::Text(j.to_string())),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::from(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            structured => Value::Json(structured),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Typed accessors used by the per-table row mappers.
pub trait RowExt {
    fn value(&self, column: &str) -> &Value;

    fn int(&self, column: &str) -> StoreResult<i64> {
        self.opt_int(column)?
            .ok_or_else(|| decode_error(column, "unexpected null"))
    }

    fn opt_int(&self, column: &str) -> StoreResult<Option<i64>> {
        match self.value(column) {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v)),
            Value::Text(s) => s
                .parse()
                .map(Some)
                .map_err(|_| decode_error(column, "text is not an integer")),
            other => Err(decode_error(column, &format!("expected integer, got {}", other.kind()))),
        }
    }

    fn flag(&self, column: &str) -> StoreResult<bool> {
        Ok(self.opt_int(column)?.unwrap_or(0) != 0)
    }

    fn text(&self, column: &str) -> StoreResult<String> {
        self.opt_text(column)?
            .ok_or_else(|| decode_error(column, "unexpected null"))
    }

    fn opt_text(&self, column: &str) -> StoreResult<Option<String>> {
        match self.value(column) {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            Value::Integer(v) => Ok(Some(v.to_string())),
            Value::Real(v) => Ok(Some(v.to_string())),
            Value::DateTime(dt) => Ok(Some(format_datetime(dt))),
            Value::Json(j) => Ok(Some(j.to_string())),
            Value::Blob(_) => Err(decode_error(column, "expected text, got blob")),
        }
    }

    fn datetime(&self, column: &str) -> StoreResult<DateTime<Utc>> {
        self.opt_datetime(column)?
            .ok_or_else(|| decode_error(column, "unexpected null"))
    }

    fn opt_datetime(&self, column: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.value(column) {
            Value::Null => Ok(None),
            Value::DateTime(dt) => Ok(Some(*dt)),
            Value::Text(s) => parse_datetime(s)
                .map(Some)
                .ok_or_else(|| decode_error(column, "text is not a date/time")),
            other => Err(decode_error(column, &format!("expected datetime, got {}", other.kind()))),
        }
    }

    /// Structured column; JSON text that was not decoded on read is parsed here.
    fn json(&self, column: &str) -> StoreResult<Option<serde_json::Value>> {
        match self.value(column) {
            Value::Null => Ok(None),
            Value::Json(j) => Ok(Some(j.clone())),
            Value::Text(s) => serde_json::from_str(s)
                .map(Some)
                .map_err(|e| decode_error(column, &e.to_string())),
            other => Ok(Some(other.to_json())),
        }
    }
}

impl RowExt for Row {
    fn value(&self, column: &str) -> &Value {
        self.get(column).unwrap_or(&NULL_VALUE)
    }
}

fn decode_error(column: &str, message: &str) -> StoreError {
    StoreError::Decode {
        column: column.to_string(),
        message: message.to_string(),
    }
}
