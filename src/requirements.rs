//! Requirement specifications.
//!
//! A requirement spec is a JSON object mapping resource field names to either
//! literal values or predicate objects (`$exists` / `$in` / `$nin` /
//! `$regex`). Specs can also be given as flat `key=value&key2=value2` strings
//! with dotted keys; those are coerced and unflattened here. Compilation into
//! a matchable query lives in [`crate::query`].

use crate::error::{ReslockError, Result};
use crate::unflatten::unflatten;
use serde_json::{Map, Value};

/// A normalized requirement specification (nested JSON object form).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements(Map<String, Value>);

impl Requirements {
    /// Empty requirement set: matches every resource (subject to the
    /// engine's default constraints).
    pub fn none() -> Self {
        Self(Map::new())
    }

    /// Parse a requirement spec from its string form.
    ///
    /// A blank string yields the empty spec. Input starting with `{` is
    /// parsed as a JSON object. Anything else is treated as a
    /// `key=value&key2=value2` string: `true`/`false` (case-insensitive)
    /// coerce to booleans, everything else stays a string, and dotted keys
    /// are unflattened into nested objects.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::none());
        }
        if spec.starts_with('{') {
            let map: Map<String, Value> = serde_json::from_str(spec)
                .map_err(|e| ReslockError::Parse(e.to_string()))?;
            return Ok(Self(map));
        }
        Self::parse_kv(spec)
    }

    /// Parse the flat `key=value&key2=value2` form.
    fn parse_kv(spec: &str) -> Result<Self> {
        let mut flat = Map::new();
        for part in spec.split('&') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ReslockError::Parse(format!("missing value ({part})")))?;
            if value.is_empty() {
                return Err(ReslockError::Parse(format!("missing value ({part})")));
            }
            let value = if value.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if value.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                Value::String(value.to_string())
            };
            flat.insert(key.to_string(), value);
        }
        Ok(Self(unflatten(flat)?))
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Merge the engine's default constraints under this spec.
    ///
    /// Defaults are `hostname = <engine hostname>` and `online = true`;
    /// caller-provided values win. An explicit null for either of those two
    /// keys removes the constraint entirely. Null values on other keys stay
    /// as literal requirements.
    pub fn with_defaults(&self, hostname: &str) -> Self {
        let mut merged = Map::new();
        merged.insert("hostname".to_string(), Value::String(hostname.to_string()));
        merged.insert("online".to_string(), Value::Bool(true));
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        for key in ["hostname", "online"] {
            if merged.get(key) == Some(&Value::Null) {
                merged.remove(key);
            }
        }
        Self(merged)
    }

    /// Render the spec as compact JSON, for error messages and logs.
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for Requirements {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Requirements {
    type Error = ReslockError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ReslockError::Parse(format!(
                "requirements must be a JSON object, got: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Requirements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(spec: &str) -> Value {
        Value::Object(Requirements::parse(spec).unwrap().fields().clone())
    }

    #[test]
    fn blank_spec_is_empty() {
        assert_eq!(fields(""), json!({}));
        assert_eq!(fields("   "), json!({}));
    }

    #[test]
    fn json_spec_parses() {
        assert_eq!(
            fields(r#"{"id": "1", "online": true}"#),
            json!({"id": "1", "online": true})
        );
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Requirements::parse(r#"{"id": }"#).unwrap_err();
        assert!(matches!(err, ReslockError::Parse(_)));
    }

    #[test]
    fn kv_spec_parses_with_bool_coercion() {
        assert_eq!(
            fields("id=1&online=True&debug=false"),
            json!({"id": "1", "online": true, "debug": false})
        );
    }

    #[test]
    fn kv_spec_unflattens_dotted_keys() {
        assert_eq!(
            fields("info.sku=abc&id=1"),
            json!({"info": {"sku": "abc"}, "id": "1"})
        );
    }

    #[test]
    fn kv_spec_missing_separator_fails() {
        let err = Requirements::parse("id").unwrap_err();
        assert!(err.to_string().contains("missing value (id)"));
    }

    #[test]
    fn kv_spec_empty_value_fails() {
        let err = Requirements::parse("id=").unwrap_err();
        assert!(err.to_string().contains("missing value (id=)"));
    }

    #[test]
    fn defaults_are_merged_under_caller_values() {
        let reqs = Requirements::parse("id=1").unwrap().with_defaults("host-a");
        assert_eq!(
            Value::Object(reqs.fields().clone()),
            json!({"hostname": "host-a", "online": true, "id": "1"})
        );
    }

    #[test]
    fn caller_values_override_defaults() {
        let reqs = Requirements::try_from(json!({"hostname": "other", "online": false}))
            .unwrap()
            .with_defaults("host-a");
        assert_eq!(
            Value::Object(reqs.fields().clone()),
            json!({"hostname": "other", "online": false})
        );
    }

    #[test]
    fn null_removes_default_constraints() {
        let reqs = Requirements::try_from(json!({"hostname": null, "online": null}))
            .unwrap()
            .with_defaults("host-a");
        assert_eq!(Value::Object(reqs.fields().clone()), json!({}));
    }

    #[test]
    fn null_on_other_keys_stays_literal() {
        let reqs = Requirements::try_from(json!({"serial": null}))
            .unwrap()
            .with_defaults("host-a");
        assert_eq!(reqs.fields().get("serial"), Some(&Value::Null));
    }

    #[test]
    fn non_object_json_is_rejected() {
        let err = Requirements::try_from(json!([1, 2])).unwrap_err();
        assert!(matches!(err, ReslockError::Parse(_)));
    }
}
