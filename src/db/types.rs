//! PostgreSQL to JSON value mapping.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders extract the value from the row
//!
//! NUMERIC values go through [`BigDecimal`] and are converted to `f64`. This
//! is a lossy transport conversion: precision beyond what a double can hold is
//! dropped, so callers needing exact decimals should cast to `text` in SQL.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

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
    Uuid,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    match lower.as_str() {
        "numeric" | "decimal" => TypeCategory::Decimal,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "serial" | "bigserial"
        | "smallserial" | "oid" => TypeCategory::Integer,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "bool" | "boolean" => TypeCategory::Boolean,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" => TypeCategory::Binary,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" | "character varying"
        | "character" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Convert an arbitrary-precision decimal to a JSON number.
///
/// Values outside the `f64` range fall back to their string form.
pub fn decimal_to_json(value: &BigDecimal) -> JsonValue {
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Encode binary data as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Column names of a row, in select-list order.
pub fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every column of a row, preserving column order.
pub fn row_to_values(row: &PgRow) -> Vec<JsonValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let type_name = col.type_info().name();
            decode_column(row, idx, type_name, categorize_type(type_name))
        })
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => get::<bool>(row, idx).map(JsonValue::Bool),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => get::<Vec<u8>>(row, idx).map(|v| encode_binary_value(&v)),
        TypeCategory::Json => get::<JsonValue>(row, idx),
        TypeCategory::Uuid => get::<uuid::Uuid>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Date => get::<NaiveDate>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Time => get::<NaiveTime>(row, idx).map(|v| JsonValue::String(v.to_string())),
        TypeCategory::Timestamp => get::<NaiveDateTime>(row, idx)
            .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        TypeCategory::TimestampTz => {
            get::<DateTime<Utc>>(row, idx).map(|v| JsonValue::String(v.to_rfc3339()))
        }
        TypeCategory::Text | TypeCategory::Unknown => {
            let value = get::<String>(row, idx);
            if value.is_none() && category == TypeCategory::Unknown {
                debug!(column = idx, type_name, "No JSON mapping for column type");
            }
            value.map(JsonValue::String)
        }
    }
    .unwrap_or(JsonValue::Null)
}

/// Decode a nullable column; decode failures are treated as NULL.
fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn decode_decimal(row: &PgRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<Option<BigDecimal>, _>(idx) {
        Ok(v) => v.map(|d| decimal_to_json(&d)),
        Err(e) => {
            tracing::error!("Failed to decode NUMERIC: {:?}", e);
            None
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
    if let Some(v) = get::<i16>(row, idx) {
        return Some(v.into());
    }
    if let Some(v) = get::<i32>(row, idx) {
        return Some(v.into());
    }
    if let Some(v) = get::<i64>(row, idx) {
        return Some(v.into());
    }
    get::<sqlx::postgres::types::Oid>(row, idx).map(|v| v.0.into())
}

fn decode_float(row: &PgRow, idx: usize) -> Option<JsonValue> {
    let v = get::<f64>(row, idx).or_else(|| get::<f32>(row, idx).map(f64::from))?;
    Some(
        serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_categorize_type() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("int8"), TypeCategory::Integer);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("jsonb"), TypeCategory::Json);
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("tsvector"), TypeCategory::Unknown);
    }

    #[test]
    fn test_decimal_to_json_is_float() {
        let value = BigDecimal::from_str("8.75").unwrap();
        assert_eq!(decimal_to_json(&value), serde_json::json!(8.75));
    }

    #[test]
    fn test_decimal_to_json_loses_precision() {
        let value = BigDecimal::from_str("0.1000000000000000000000000001").unwrap();
        let json = decimal_to_json(&value);
        assert_eq!(json.as_f64(), Some(0.1));
    }

    #[test]
    fn test_encode_binary_value() {
        assert_eq!(
            encode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(encode_binary_value(&[]), JsonValue::String(String::new()));
    }
}
