// SPDX-License-Identifier: MIT

//! Variable schema declared by a workflow definition

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Declared run variables, keyed by name
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct VariableSchema {
    #[serde(flatten)]
    pub fields: HashMap<String, VariableDef>,
}

/// Declaration of a single run variable
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VariableDef {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// How writes are folded into the current value
    #[serde(default)]
    pub reducer: ReducerType,
    /// Seeded into every new run's context
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Whether `value` is acceptable for a variable of this type. Null is
    /// accepted everywhere.
    pub fn admits(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// Reducer types for merging values into the context
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Shallow merge objects
    Merge,
}

impl VariableSchema {
    /// Reducer for `name`; undeclared variables are overwritten
    pub fn reducer(&self, name: &str) -> ReducerType {
        self.fields
            .get(name)
            .map(|def| def.reducer)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variable_schema_deserialize() {
        let yaml = r#"
            approvers:
              type: array
              reducer: append
              default: []
            amount:
              type: number
            note: {}
        "#;
        let schema: VariableSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields["approvers"].field_type, FieldType::Array);
        assert_eq!(schema.fields["approvers"].default, Some(json!([])));
        assert_eq!(schema.fields["amount"].reducer, ReducerType::Overwrite);
        assert_eq!(schema.fields["note"].field_type, FieldType::Any);
    }

    #[test]
    fn test_all_reducers() {
        let yaml = r#"
            f1: { type: string, reducer: overwrite }
            f2: { type: array, reducer: append }
            f3: { type: number, reducer: max }
            f4: { type: number, reducer: min }
            f5: { type: object, reducer: merge }
        "#;
        let schema: VariableSchema = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(schema.reducer("f1"), ReducerType::Overwrite);
        assert_eq!(schema.reducer("f2"), ReducerType::Append);
        assert_eq!(schema.reducer("f3"), ReducerType::Max);
        assert_eq!(schema.reducer("f4"), ReducerType::Min);
        assert_eq!(schema.reducer("f5"), ReducerType::Merge);
        assert_eq!(schema.reducer("undeclared"), ReducerType::Overwrite);
    }

    #[test]
    fn test_field_type_admits() {
        assert!(FieldType::Number.admits(&json!(3)));
        assert!(FieldType::Number.admits(&Value::Null));
        assert!(!FieldType::Number.admits(&json!("3")));
        assert!(FieldType::Any.admits(&json!({"a": 1})));
        assert!(!FieldType::Object.admits(&json!([1])));
    }
}
