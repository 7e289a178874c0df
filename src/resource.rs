//! Resource records and inventory validation.

use crate::error::{ReslockError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// One allocatable item's descriptive mapping.
///
/// Records are arbitrary string-keyed JSON objects; the single mandatory key
/// is `id`, which [`validate_inventory`] guarantees is a unique non-empty
/// string within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRecord(Map<String, Value>);

impl ResourceRecord {
    /// The record's unique id.
    ///
    /// Returns an empty string for a record that never passed inventory
    /// validation; validated snapshots always carry one.
    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    /// Look up a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the record carries the given field.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ResourceRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl std::fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&Value::Object(self.0.clone()).to_string())
    }
}

/// Parse a JSON value into an inventory snapshot.
///
/// The top-level value must be an array of objects; anything else is a
/// validation error. The parsed records are then checked with
/// [`validate_inventory`].
pub fn parse_inventory(value: Value) -> Result<Vec<ResourceRecord>> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(ReslockError::Validation(format!(
                "resource data is not a list, got: {other}"
            )));
        }
    };
    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => records.push(ResourceRecord::from(map)),
            other => {
                return Err(ReslockError::Validation(format!(
                    "resource entry is not an object: {other}"
                )));
            }
        }
    }
    validate_inventory(&records)?;
    Ok(records)
}

/// Validate an inventory snapshot.
///
/// Every record must carry an `id` that is a non-empty string, and no two
/// records may share one. Violations are fatal load-time errors, never
/// runtime allocation errors.
pub fn validate_inventory(records: &[ResourceRecord]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for record in records {
        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(other) => {
                return Err(ReslockError::Validation(format!(
                    "id property must be a non-empty string, got: {other}"
                )));
            }
            None => {
                return Err(ReslockError::Validation(
                    "id property is missing".to_string(),
                ));
            }
        };
        if !seen.insert(id.as_str()) {
            duplicates.push(id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ReslockError::Validation(format!(
            "duplicate ids: {}",
            duplicates.join(", ")
        )));
    }
    Ok(())
}
