//! Decoding sqlx rows into [`Value`] rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, Postgres};
use sqlx::{Column, Row as _, Type, TypeInfo, ValueRef};
use uuid::Uuid;

use super::FieldInfo;
use crate::value::{Row, Value};
use crate::{PgKitError, Result};

/// Field descriptions of a row's columns.
pub fn fields_of(row: &PgRow) -> Vec<FieldInfo> {
    row.columns()
        .iter()
        .map(|column| FieldInfo {
            name: column.name().to_string(),
            data_type_id: type_oid(column.type_info()),
        })
        .collect()
}

fn type_oid(info: &PgTypeInfo) -> u32 {
    info.oid().map(|oid| oid.0).unwrap_or(0)
}

/// Decode every column of `row`.
pub fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name();

        let value = match type_name {
            "BOOL" => get::<bool>(row, idx, name)?.map(Value::Bool),
            "INT2" => get::<i16>(row, idx, name)?.map(|v| Value::Int(v.into())),
            "INT4" => get::<i32>(row, idx, name)?.map(|v| Value::Int(v.into())),
            "INT8" => get::<i64>(row, idx, name)?.map(Value::Int),
            "OID" => get::<sqlx::postgres::types::Oid>(row, idx, name)?.map(|v| Value::Int(v.0.into())),
            "FLOAT4" => get::<f32>(row, idx, name)?.map(|v| Value::Float(v.into())),
            "FLOAT8" => get::<f64>(row, idx, name)?.map(Value::Float),
            "NUMERIC" => get::<Decimal>(row, idx, name)?.map(|v| Value::Text(v.to_string())),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" => {
                get::<String>(row, idx, name)?.map(Value::Text)
            }
            "UUID" => get::<Uuid>(row, idx, name)?.map(|v| Value::Text(v.to_string())),
            "DATE" => get::<NaiveDate>(row, idx, name)?
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Value::Timestamp(dt.and_utc())),
            "TIME" => get::<NaiveTime>(row, idx, name)?.map(|t| Value::Text(t.to_string())),
            "TIMESTAMP" => get::<NaiveDateTime>(row, idx, name)?.map(|dt| Value::Timestamp(dt.and_utc())),
            "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx, name)?.map(Value::Timestamp),
            "JSON" | "JSONB" => get::<JsonValue>(row, idx, name)?.map(Value::Json),
            "BYTEA" => get::<Vec<u8>>(row, idx, name)?.map(|bytes| Value::Text(bytea_hex(&bytes))),
            "BOOL[]" => array::<bool>(row, idx, name, Value::Bool)?,
            "INT2[]" => array::<i16>(row, idx, name, |v| Value::Int(v.into()))?,
            "INT4[]" => array::<i32>(row, idx, name, |v| Value::Int(v.into()))?,
            "INT8[]" => array::<i64>(row, idx, name, Value::Int)?,
            "FLOAT8[]" => array::<f64>(row, idx, name, Value::Float)?,
            "TEXT[]" | "VARCHAR[]" => array::<String>(row, idx, name, Value::Text)?,
            "UUID[]" => array::<Uuid>(row, idx, name, |v| Value::Text(v.to_string()))?,
            other => {
                tracing::debug!(column = name, pg_type = other, "Decoding unrecognized type as text");
                raw(row, idx, name)?
            }
        };

        out.insert(name.to_string(), value.unwrap_or(Value::Null));
    }

    Ok(out)
}

fn get<'r, T>(row: &'r PgRow, idx: usize, column: &str) -> Result<Option<T>>
where
    T: sqlx::Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(|e| {
        PgKitError::Deserialization(format!("Failed to decode column '{}': {}", column, e))
    })
}

/// Undecoded column value: the server's text form, or hex for binary.
///
/// Covers INTERVAL, INET, MONEY, multi-dimensional arrays and any other type
/// without a typed decoder.
fn raw(row: &PgRow, idx: usize, column: &str) -> Result<Option<Value>> {
    let decode_err =
        |e: String| PgKitError::Deserialization(format!("Failed to read column '{}': {}", column, e));
    let value = row.try_get_raw(idx).map_err(|e| decode_err(e.to_string()))?;
    if value.is_null() {
        return Ok(None);
    }
    let format = value.format();
    let bytes = value.as_bytes().map_err(|e| decode_err(e.to_string()))?;
    raw_value(format, bytes).map(Some).map_err(decode_err)
}

fn raw_value(format: PgValueFormat, bytes: &[u8]) -> std::result::Result<Value, String> {
    match format {
        PgValueFormat::Text => std::str::from_utf8(bytes)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| e.to_string()),
        PgValueFormat::Binary => Ok(Value::Text(bytea_hex(bytes))),
    }
}

fn array<T>(
    row: &PgRow,
    idx: usize,
    column: &str,
    convert: impl Fn(T) -> Value,
) -> Result<Option<Value>>
where
    T: for<'a> sqlx::Decode<'a, Postgres> + Type<Postgres> + sqlx::postgres::PgHasArrayType,
{
    let values = row.try_get::<Option<Vec<T>>, _>(idx).map_err(|e| {
        PgKitError::Deserialization(format!("Failed to decode array column '{}': {}", column, e))
    })?;
    Ok(values.map(|items| Value::Array(items.into_iter().map(convert).collect())))
}

fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
