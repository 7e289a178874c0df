//! Expansion of dot-separated keys into nested JSON objects.
//!
//! Requirement strings may address nested resource fields with dotted keys
//! (`"info.sku=abc"`); before matching they are unflattened into the nested
//! structure the inventory uses.

use crate::error::{ReslockError, Result};
use serde_json::{Map, Value};

/// Convert a flat map with dot-separated keys into a nested JSON object.
///
/// `{"key": "a", "nested.key": "b"}` becomes
/// `{"key": "a", "nested": {"key": "b"}}`.
///
/// Keys that start or end with a dot, or contain consecutive dots, are
/// rejected. If a prefix collides with a non-object value already inserted,
/// the later value wins the slot by replacing it with an object, same as
/// repeated `setdefault` insertion.
pub fn unflatten(input: Map<String, Value>) -> Result<Map<String, Value>> {
    let mut result = Map::new();
    for (key, value) in input {
        if key.starts_with('.') || key.ends_with('.') || key.contains("..") {
            return Err(ReslockError::Parse(format!("invalid key format: {key}")));
        }
        let mut parts = key.split('.').collect::<Vec<_>>();
        let last = parts.pop().unwrap_or_default();
        let mut cursor = &mut result;
        for part in parts {
            let slot = cursor
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            cursor = slot
                .as_object_mut()
                .unwrap_or_else(|| unreachable!("slot was just made an object"));
        }
        cursor.insert(last.to_string(), value);
    }
    Ok(result)
}
