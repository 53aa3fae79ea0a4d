//! Index templates scoped to a logical name.

use crate::error::IndexError;
use crate::naming::LogicalName;
use serde_json::{Map, Value};

/// Validated template document, scoped to `{name}-*`
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    body: Map<String, Value>,
}

impl Template {
    /// Validate a caller-supplied template for `name`
    ///
    /// `None` and an empty object both mean "no template".
    pub fn parse(name: &LogicalName, body: Option<Value>) -> Result<Option<Self>, IndexError> {
        let mut body = match body {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(map)) if map.is_empty() => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(IndexError::validation(format!(
                    "template must be a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        for key in ["settings", "mappings"] {
            if let Some(value) = body.get(key) {
                if !value.is_object() {
                    return Err(IndexError::validation(format!(
                        "template \"{}\" must be an object, got {}",
                        key,
                        json_type(value)
                    )));
                }
            }
        }

        let pattern = name.index_pattern();
        match body.get("index_patterns") {
            None => {}
            Some(Value::Array(patterns))
                if patterns.len() == 1 && patterns[0].as_str() == Some(pattern.as_str()) => {}
            Some(Value::Array(patterns)) => {
                return Err(IndexError::validation(format!(
                    "template index_patterns must be [\"{}\"], got {}",
                    pattern,
                    Value::Array(patterns.clone())
                )))
            }
            Some(other) => {
                return Err(IndexError::validation(format!(
                    "template index_patterns must be an array, got {}",
                    json_type(other)
                )))
            }
        }
        body.insert(
            "index_patterns".to_string(),
            Value::Array(vec![Value::String(pattern)]),
        );

        Ok(Some(Template { body }))
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
