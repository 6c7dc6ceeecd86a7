//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::{Result, StewardError};

/// The JSON arguments of a tool call with typed accessors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolArguments {
    value: Value,
}

impl ToolArguments {
    /// Wrap a JSON value. A missing or `null` value becomes `{}`.
    pub fn new(value: Value) -> Self {
        let value = match value {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Self { value }
    }

    pub fn raw(&self) -> &Value {
        &self.value
    }

    pub fn into_raw(self) -> Value {
        self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| missing("string", key))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.value
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("integer", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.value
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| missing("boolean", key))
    }

    /// Return a copy with `key` set to `value`. Non-object arguments are replaced.
    pub fn with(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = self.value.as_object().cloned().unwrap_or_default();
        map.insert(key.to_string(), value.into());
        Self {
            value: Value::Object(map),
        }
    }

    /// Deserialize the arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            StewardError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

fn missing(kind: &str, key: &str) -> StewardError {
    StewardError::InvalidArgument(format!("Missing {kind} argument: {key}"))
}
