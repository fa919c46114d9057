//! Encoding and decoding between JSON field maps and PostgreSQL rows.
//!
//! Every conversion is driven by the entity's column plan, so the value
//! bound at position `i` of an INSERT and the value decoded from column
//! `i` of a scanned row always refer to the same property.

use backsaas_core::{Column, ColumnPlan, ColumnType};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::str::FromStr;

use super::error::StoreError;

/// A value ready to be bound to one statement placeholder, typed for the
/// column it targets.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(Option<String>),
    Int(Option<i32>),
    Decimal(Option<Decimal>),
    Bool(Option<bool>),
    Jsonb(Option<Value>),
    Timestamp(Option<DateTime<Utc>>),
}

/// Encodes a JSON value for the given column.
///
/// Validation has already run, so a mismatch here points at an engine bug
/// or a value outside the store's range (e.g. an integer beyond 32 bits);
/// either way it surfaces as a serialization error, not a panic.
pub fn encode(column: &Column, value: &Value) -> Result<BindValue, StoreError> {
    if value.is_null() {
        return Ok(null_for(column.ty));
    }
    let mismatch = |expected: &str| StoreError::Serialization {
        column: column.name.clone(),
        message: format!("expected {expected}, got {value}"),
    };
    match column.ty {
        ColumnType::Varchar(_) | ColumnType::Text => match value {
            Value::String(s) => Ok(BindValue::Text(Some(s.clone()))),
            _ => Err(mismatch("string")),
        },
        ColumnType::Integer => {
            let n = value.as_i64().or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            });
            let n = n.ok_or_else(|| mismatch("integer"))?;
            let n = i32::try_from(n).map_err(|_| StoreError::Serialization {
                column: column.name.clone(),
                message: format!("integer {n} is out of range"),
            })?;
            Ok(BindValue::Int(Some(n)))
        }
        ColumnType::Decimal => match value {
            Value::Number(n) => {
                let d = Decimal::from_str(&n.to_string()).map_err(|e| {
                    StoreError::Serialization {
                        column: column.name.clone(),
                        message: format!("not a valid decimal: {e}"),
                    }
                })?;
                Ok(BindValue::Decimal(Some(d)))
            }
            _ => Err(mismatch("number")),
        },
        ColumnType::Boolean => match value {
            Value::Bool(b) => Ok(BindValue::Bool(Some(*b))),
            _ => Err(mismatch("boolean")),
        },
        ColumnType::Jsonb => Ok(BindValue::Jsonb(Some(value.clone()))),
        ColumnType::TimestampTz => match value {
            Value::String(s) => {
                let ts = DateTime::parse_from_rfc3339(s).map_err(|e| {
                    StoreError::Serialization {
                        column: column.name.clone(),
                        message: format!("not a valid timestamp: {e}"),
                    }
                })?;
                Ok(BindValue::Timestamp(Some(ts.with_timezone(&Utc))))
            }
            _ => Err(mismatch("timestamp string")),
        },
    }
}

fn null_for(ty: ColumnType) -> BindValue {
    match ty {
        ColumnType::Varchar(_) | ColumnType::Text => BindValue::Text(None),
        ColumnType::Integer => BindValue::Int(None),
        ColumnType::Decimal => BindValue::Decimal(None),
        ColumnType::Boolean => BindValue::Bool(None),
        ColumnType::Jsonb => BindValue::Jsonb(None),
        ColumnType::TimestampTz => BindValue::Timestamp(None),
    }
}

/// Binds one encoded value to the next placeholder of a query.
pub fn bind<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: BindValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        BindValue::Text(v) => query.bind(v),
        BindValue::Int(v) => query.bind(v),
        BindValue::Decimal(v) => query.bind(v),
        BindValue::Bool(v) => query.bind(v),
        BindValue::Jsonb(v) => query.bind(v.map(Json)),
        BindValue::Timestamp(v) => query.bind(v),
    }
}

/// Decodes a scanned row back into a JSON field map, walking the plan's
/// ordered column list.
pub fn decode_row(plan: &ColumnPlan, row: &PgRow) -> Result<Map<String, Value>, StoreError> {
    let mut out = Map::new();
    for column in &plan.columns {
        out.insert(column.name.clone(), decode_column(column, row)?);
    }
    Ok(out)
}

fn decode_column(column: &Column, row: &PgRow) -> Result<Value, StoreError> {
    let name = column.name.as_str();
    let failed = |e: sqlx::Error| StoreError::Serialization {
        column: name.to_string(),
        message: e.to_string(),
    };
    let value = match column.ty {
        ColumnType::Varchar(_) | ColumnType::Text => row
            .try_get::<Option<String>, _>(name)
            .map_err(failed)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnType::Integer => row
            .try_get::<Option<i32>, _>(name)
            .map_err(failed)?
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::Null),
        ColumnType::Decimal => row
            .try_get::<Option<Decimal>, _>(name)
            .map_err(failed)?
            .and_then(|d| d.to_f64())
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(name)
            .map_err(failed)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnType::Jsonb => row
            .try_get::<Option<Json<Value>>, _>(name)
            .map_err(failed)?
            .map(|j| j.0)
            .unwrap_or(Value::Null),
        ColumnType::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(name)
            .map_err(failed)?
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

/// Coerces a raw query-string filter value to the column's JSON type, so
/// `?age=42` compares as an integer and `?active=true` as a boolean.
pub fn coerce_filter(column: &Column, raw: &str) -> Result<Value, StoreError> {
    let invalid = |expected: &str| StoreError::Validation {
        message: format!(
            "filter '{}' expects {expected}, got '{raw}'",
            column.name
        ),
    };
    match column.ty {
        ColumnType::Varchar(_) | ColumnType::Text | ColumnType::TimestampTz => {
            Ok(Value::String(raw.to_string()))
        }
        ColumnType::Integer => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| invalid("an integer")),
        ColumnType::Decimal => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| invalid("a number")),
        ColumnType::Boolean => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid("a boolean")),
        },
        ColumnType::Jsonb => {
            serde_json::from_str(raw).map_err(|_| invalid("a JSON value"))
        }
    }
}
