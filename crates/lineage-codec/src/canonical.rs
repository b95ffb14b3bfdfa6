//! Canonical JSON: sorted keys, no insignificant whitespace.

use std::collections::BTreeMap;

use lineage_core::errors::{ErrorInfo, LineageError};
use serde::Serialize;
use serde_json::{Map, Value};

/// Recursively sorts object keys so equal values always print identically.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, val)| (key, canonicalize(val)))
                .collect();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical compact JSON bytes.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, LineageError> {
    let value = serde_json::to_value(value).map_err(|err| encode_error("json-encode", err))?;
    canonical_value_bytes(canonicalize(value))
}

pub(crate) fn canonical_value_bytes(value: Value) -> Result<Vec<u8>, LineageError> {
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonicalize(value))
        .map_err(|err| encode_error("json-write", err))?;
    Ok(bytes)
}

pub(crate) fn encode_error(code: &str, err: impl ToString) -> LineageError {
    LineageError::InvalidInput(ErrorInfo::new(code, err.to_string()))
}
