//! Canonical hashing encoding.
//!
//! Every entity is rendered as a JSON object with lexicographically sorted
//! keys, unset optional fields omitted, and no insignificant whitespace. Two
//! logically equal values always produce identical bytes.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, TypeError};

/// Render `value` as a canonical JSON value tree.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    let raw = serde_json::to_value(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
    Ok(normalize(raw))
}

/// Canonical UTF-8 bytes of `value`.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let canonical = to_canonical_value(value)?;
    serde_json::to_vec(&canonical).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Drop null members and rebuild every object in sorted key order, so the
/// output does not depend on how the map type orders its entries.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, normalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}
