//! Validate tool call arguments against a JSON Schema before execution.
//!
//! Covers the subset of JSON Schema that function declarations use: `type`
//! (either lower-case or the upper-case Gemini spelling), `required`,
//! `properties`, `items` and string `enum`. Nested objects and arrays are
//! checked recursively.

use serde_json::Value;

/// Validate `args` against `schema`.
///
/// Returns `None` when valid, otherwise a message describing the first
/// violation, addressed from the root as `params` (e.g.
/// `params/path must be string`).
pub fn validate_arguments(args: &Value, schema: &Value) -> Option<String> {
    validate_at("params", args, schema)
}

fn validate_at(path: &str, value: &Value, schema: &Value) -> Option<String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !value_matches_type(value, expected) {
            return Some(format!(
                "{path} must be {}",
                expected.to_ascii_lowercase()
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.is_empty() && !allowed.contains(value) {
            let names: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Some(format!(
                "{path} must be equal to one of the allowed values: {}",
                names.join(", ")
            ));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Some(format!("{path} must have required property '{name}'"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, field) in obj {
                if let Some(field_schema) = properties.get(key) {
                    if let Some(err) = validate_at(&format!("{path}/{key}"), field, field_schema) {
                        return Some(err);
                    }
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            if let Some(err) = validate_at(&format!("{path}/{index}"), item, item_schema) {
                return Some(err);
            }
        }
    }

    None
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected.to_ascii_lowercase().as_str() {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
