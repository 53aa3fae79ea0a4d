//! Insertion-ordered audit trail of one operation.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Step name → raw step result, in the order steps ran
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationLog {
    entries: Map<String, Value>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step result; re-recording a step keeps its original position
    pub fn record(&mut self, step: &str, value: impl Into<Value>) {
        self.entries.insert(step.to_string(), value.into());
    }

    pub fn get(&self, step: &str) -> Option<&Value> {
        self.entries.get(step)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.entries.contains_key(step)
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.clone())
    }
}

impl Serialize for OperationLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}
