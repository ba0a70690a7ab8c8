// SPDX-License-Identifier: MIT

//! Run variable context with reducer support

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::{ReducerType, VariableSchema};
use crate::kit::error::CadenceError;

/// Variables of a single run. Serialises as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    fields: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from caller input. `null` is an empty context; any
    /// other non-object input is rejected.
    pub fn from_value(value: Value) -> Result<Self, CadenceError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CadenceError::InvalidInput(format!(
                "context must be an object, got {}",
                other
            ))),
        }
    }

    /// Seed declared defaults, then lay `input` over them
    pub fn seeded(schema: &VariableSchema, input: Context) -> Self {
        let mut fields = Map::new();
        for (name, def) in &schema.fields {
            if let Some(default) = &def.default {
                fields.insert(name.clone(), default.clone());
            }
        }
        fields.extend(input.fields);
        Self { fields }
    }

    /// Update a variable using the given reducer
    pub fn merge(&mut self, key: &str, value: Value, reducer: ReducerType) {
        match reducer {
            ReducerType::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            ReducerType::Append => {
                let slot = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if slot.is_null() {
                    *slot = Value::Array(vec![]);
                }
                match slot {
                    Value::Array(items) => match value {
                        Value::Array(new_items) => items.extend(new_items),
                        other => items.push(other),
                    },
                    // a scalar already there becomes the first element
                    existing => {
                        let first = existing.take();
                        let mut items = vec![first];
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            other => items.push(other),
                        }
                        *existing = Value::Array(items);
                    }
                }
            }
            ReducerType::Max | ReducerType::Min => {
                let current = self.fields.get(key).and_then(Value::as_f64);
                let keep_new = match (current, value.as_f64()) {
                    (_, None) => false,
                    (None, Some(_)) => true,
                    (Some(cur), Some(new)) if reducer == ReducerType::Max => new > cur,
                    (Some(cur), Some(new)) => new < cur,
                };
                if keep_new {
                    self.fields.insert(key.to_string(), value);
                }
            }
            ReducerType::Merge => {
                let slot = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                match (slot, value) {
                    (Value::Object(current), Value::Object(new)) => current.extend(new),
                    (slot, other) => *slot = other,
                }
            }
        }
    }

    /// Fold every field of an object result into the context
    pub fn merge_object(&mut self, object: Map<String, Value>, schema: &VariableSchema) {
        for (key, value) in object {
            let reducer = schema.reducer(&key);
            self.merge(&key, value, reducer);
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Nested lookup using dot notation; numeric segments index lists
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}
