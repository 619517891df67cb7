//! Application-side value representation.
//!
//! Rows travel between application code and the driver as maps of
//! property (or column) name to [`Value`]. The coercion layer converts
//! between the typed variants and their wire representations.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde_json::Value as JsonValue;

/// A single row keyed by property or column name.
pub type Row = HashMap<String, Value>;

/// A value as seen by application code.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Arbitrary-precision integer (BIGINT columns)
    BigInt(BigInt),
    /// Wall-clock instant (DATE / TIMESTAMP columns)
    Timestamp(DateTime<Utc>),
    /// Structured JSON (JSON / JSONB columns)
    Json(JsonValue),
    Array(Vec<Value>),
    /// Composite value keyed by sub-field name
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::BigInt(_) => "bigint",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Converts the value into a JSON value.
    ///
    /// BigInts become decimal strings and timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::Int(v) => JsonValue::Number((*v).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::BigInt(v) => JsonValue::String(v.to_string()),
            Value::Timestamp(v) => JsonValue::String(
                v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ),
            Value::Json(v) => v.clone(),
            Value::Array(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
            Value::Object(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Loose truthiness used when a boolean column receives a non-text value.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0 && !v.is_nan(),
            Value::Text(v) => !v.is_empty(),
            Value::BigInt(v) => *v != BigInt::from(0),
            Value::Json(v) => !matches!(v, JsonValue::Null | JsonValue::Bool(false)),
            Value::Timestamp(_) | Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Timestamp(v) => {
                write!(f, "{}", v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            }
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::BigInt(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
