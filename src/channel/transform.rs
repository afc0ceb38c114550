//! Pure conversion of raw change-record columns into typed values.
//!
//! The realtime server sends row values as they appear in the WAL text
//! stream, so booleans arrive as `"t"`/`"f"` and oids as digit strings.
//! Callbacks receive the coerced form.

use serde_json::{Map, Value};

use super::postgres_changes::ColumnInfo;
use crate::types::constants::postgres_types;

pub fn to_boolean(value: &Value) -> Value {
    match value {
        Value::Bool(_) => value.clone(),
        Value::String(s) => Value::Bool(s == "true" || s == "t"),
        _ => Value::Bool(false),
    }
}

pub fn to_integer(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
        Value::String(s) => Value::from(s.parse::<i64>().unwrap_or(0)),
        _ => Value::from(0),
    }
}

/// Coerce a single cell according to its declared column type.
pub fn transform_cell(value: &Value, column_type: &str) -> Value {
    match column_type {
        postgres_types::BOOL => to_boolean(value),
        postgres_types::OID => to_integer(value),
        _ => value.clone(),
    }
}

/// Build a typed record from the column metadata carried in the frame.
///
/// Only columns listed in the metadata appear in the output; a column
/// absent from the record maps to null. `skip_types` passes raw values
/// through unchanged.
pub fn transform_change_data(
    columns: &[ColumnInfo],
    record: &Map<String, Value>,
    skip_types: bool,
) -> Map<String, Value> {
    columns
        .iter()
        .map(|column| {
            let value = record.get(&column.name).cloned().unwrap_or(Value::Null);
            let value = if skip_types {
                value
            } else {
                transform_cell(&value, &column.column_type)
            };
            (column.name.clone(), value)
        })
        .collect()
}
