//! SQL type-family classification and value (de)serialization.
//!
//! Forward direction (`serialize_value`) turns application values into the
//! representation sent to the driver; the inverse (`deserialize_value`)
//! turns driver values back into typed application values.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use num_bigint::BigInt;
use num_traits::FromPrimitive;
use serde_json::Value as JsonValue;

use crate::value::Value;

/// Coarse SQL type family used for (de)serialization and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    BigInt,
    /// DATE, DATETIME and every TIMESTAMP variant
    DateTime,
    Json,
    Boolean,
    Integer,
    Real,
    Text,
    Uuid,
    Other,
}

impl TypeFamily {
    /// Classify a SQL type string such as `BIGINT`, `varchar(64)` or
    /// `TIMESTAMP WITH TIME ZONE`.
    pub fn classify(sql_type: &str) -> Self {
        let upper = sql_type.trim().to_ascii_uppercase();
        if upper.starts_with("TIMESTAMP") {
            return TypeFamily::DateTime;
        }

        // Strip length / precision modifiers: VARCHAR(255) -> VARCHAR
        let base = match upper.find('(') {
            Some(idx) => upper[..idx].trim_end(),
            None => upper.as_str(),
        };

        match base {
            "BIGINT" | "INT8" | "BIGSERIAL" | "SERIAL8" => TypeFamily::BigInt,
            "DATE" | "DATETIME" => TypeFamily::DateTime,
            "JSON" | "JSONB" => TypeFamily::Json,
            "BOOLEAN" | "BOOL" => TypeFamily::Boolean,
            "INTEGER" | "INT" | "INT4" | "SMALLINT" | "INT2" | "SERIAL" | "SERIAL4"
            | "SMALLSERIAL" | "SERIAL2" => TypeFamily::Integer,
            "REAL" | "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE PRECISION" | "DOUBLE"
            | "NUMERIC" | "DECIMAL" => TypeFamily::Real,
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "BPCHAR"
            | "CITEXT" | "NAME" => TypeFamily::Text,
            "UUID" => TypeFamily::Uuid,
            _ => TypeFamily::Other,
        }
    }
}

// ============================================================================
// Forward (application -> database)
// ============================================================================

/// Serialize an application value for a column of the given family.
pub fn serialize_value(value: Value, family: TypeFamily) -> Value {
    match (family, value) {
        (_, Value::Null) => Value::Null,
        (TypeFamily::BigInt, Value::BigInt(v)) => Value::Text(v.to_string()),
        (TypeFamily::DateTime, Value::Timestamp(v)) => {
            Value::Text(v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        }
        (TypeFamily::Json, Value::Json(JsonValue::Null)) => Value::Null,
        (TypeFamily::Json, v @ (Value::Json(_) | Value::Object(_) | Value::Array(_))) => {
            Value::Text(v.to_json().to_string())
        }
        (_, v) => v,
    }
}

// ============================================================================
// Inverse (database -> application)
// ============================================================================

/// Deserialize a driver value for a column of the given family.
pub fn deserialize_value(value: Value, family: TypeFamily) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    match family {
        TypeFamily::BigInt => to_bigint(value),
        TypeFamily::DateTime => to_timestamp(value),
        TypeFamily::Json => match value {
            Value::Text(text) => match serde_json::from_str::<JsonValue>(&text) {
                Ok(parsed) => Value::Json(parsed),
                Err(_) => Value::Text(text),
            },
            other => other,
        },
        TypeFamily::Boolean => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::Text(text) => Value::Bool(matches!(text.as_str(), "true" | "t" | "1")),
            other => Value::Bool(other.truthy()),
        },
        _ => value,
    }
}

fn to_bigint(value: Value) -> Value {
    match value {
        Value::Text(text) => match BigInt::from_str(text.trim()) {
            Ok(v) => Value::BigInt(v),
            Err(_) => Value::Text(text),
        },
        Value::Int(v) => Value::BigInt(BigInt::from(v)),
        Value::Float(v) if v.fract() == 0.0 => match BigInt::from_f64(v) {
            Some(big) => Value::BigInt(big),
            None => Value::Float(v),
        },
        other => other,
    }
}

fn to_timestamp(value: Value) -> Value {
    match value {
        Value::Text(text) => match parse_timestamp(&text) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(text),
        },
        Value::Int(ms) => match Utc.timestamp_millis_opt(ms).single() {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Int(ms),
        },
        other => other,
    }
}

/// Parse the textual timestamp forms produced by PostgreSQL and by
/// the forward serializer.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }

    // PostgreSQL text output: "2024-01-02 03:04:05.123+00"
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
