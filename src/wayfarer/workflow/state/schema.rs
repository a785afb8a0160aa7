// SPDX-License-Identifier: MIT

//! State schema definitions

use crate::wdk::error::GraphDefinitionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field that collects per-branch failure records during fan-out
pub const ERRORS_FIELD: &str = "errors";

/// Schema defining the workflow state structure
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct StateSchema {
    /// Field definitions
    #[serde(flatten)]
    pub fields: BTreeMap<String, StateFieldDef>,
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StateFieldDef {
    /// Type of the field
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Reducer for merging values
    #[serde(default)]
    pub reducer: ReducerType,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Supported field types
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// Reducer types for merging values into state
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Concatenate arrays
    Append,
}

impl FieldType {
    /// Whether `value` is an acceptable value for this type. `null` clears a field.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        f.write_str(name)
    }
}

/// JSON type name of a value, for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl StateFieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            reducer: ReducerType::Overwrite,
            default: None,
        }
    }

    /// An array field whose updates are concatenated
    pub fn append() -> Self {
        Self {
            field_type: FieldType::Array,
            reducer: ReducerType::Append,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field definition
    pub fn field(mut self, name: impl Into<String>, def: StateFieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Ensure the reserved fields the engine writes to are declared
    pub fn with_reserved(mut self) -> Self {
        self.fields
            .entry(ERRORS_FIELD.to_string())
            .or_insert_with(StateFieldDef::append);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StateFieldDef> {
        self.fields.get(name)
    }

    /// Check internal consistency of the schema
    pub fn validate(&self) -> Result<(), GraphDefinitionError> {
        for (name, def) in &self.fields {
            if def.reducer == ReducerType::Append && def.field_type != FieldType::Array {
                return Err(GraphDefinitionError::InvalidSchema(format!(
                    "append field '{}' must be an array, declared as {}",
                    name, def.field_type
                )));
            }
            if let Some(default) = &def.default {
                if !def.field_type.accepts(default) {
                    return Err(GraphDefinitionError::InvalidSchema(format!(
                        "default for '{}' is {}, expected {}",
                        name,
                        json_type_name(default),
                        def.field_type
                    )));
                }
            }
        }
        if let Some(errors) = self.fields.get(ERRORS_FIELD) {
            if errors.reducer != ReducerType::Append {
                return Err(GraphDefinitionError::InvalidSchema(format!(
                    "reserved field '{}' must use the append reducer",
                    ERRORS_FIELD
                )));
            }
        }
        Ok(())
    }
}
