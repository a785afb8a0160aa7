// SPDX-License-Identifier: MIT

//! Runtime state storage for workflow execution

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::control::{ControlBlock, ControlPatch};
use super::schema::{json_type_name, ReducerType, StateSchema, ERRORS_FIELD};
use crate::wdk::error::StateError;

/// Session state: schema-checked fields plus the control block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    control: ControlBlock,
}

/// Partial update returned by a node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub control: ControlPatch,
}

impl WorkflowState {
    /// Create a new WorkflowState from a schema
    pub fn new(schema: &StateSchema) -> Self {
        let mut fields = BTreeMap::new();
        for (name, def) in &schema.fields {
            match (&def.default, def.reducer) {
                (Some(default), _) => {
                    fields.insert(name.clone(), default.clone());
                }
                (None, ReducerType::Append) => {
                    fields.insert(name.clone(), Value::Array(vec![]));
                }
                (None, ReducerType::Overwrite) => {}
            }
        }
        Self {
            fields,
            control: ControlBlock::default(),
        }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a nested field value using dot notation (e.g., "travel_info.destination")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_path(path).and_then(Value::as_f64)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn control(&self) -> &ControlBlock {
        &self.control
    }

    /// Mutable access to the control block.
    ///
    /// Node executors never get this; it is used by the engine and by repair
    /// tooling that edits checkpoints directly.
    pub fn control_mut(&mut self) -> &mut ControlBlock {
        &mut self.control
    }

    /// Validate `update` in full, then merge it. A rejected update leaves the state unchanged.
    pub fn apply(&mut self, update: StateUpdate, schema: &StateSchema) -> Result<(), StateError> {
        update.validate(schema)?;

        for (key, value) in update.fields {
            let reducer = schema.get(&key).map(|d| d.reducer).unwrap_or_default();
            match reducer {
                ReducerType::Overwrite => {
                    if value.is_null() {
                        self.fields.remove(&key);
                    } else {
                        self.fields.insert(key, value);
                    }
                }
                ReducerType::Append => {
                    let slot = self.fields.entry(key).or_insert(Value::Array(vec![]));
                    if let (Value::Array(existing), Value::Array(items)) = (slot, value) {
                        existing.extend(items);
                    }
                }
            }
        }

        self.control.apply(&update.control);
        Ok(())
    }

    /// Convert state to a JSON object, control block under `control`
    pub fn to_json(&self) -> Value {
        let mut obj: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        obj.insert(
            "control".to_string(),
            serde_json::to_value(&self.control).unwrap_or(Value::Null),
        );
        Value::Object(obj)
    }

    /// One-line summary for session listings
    pub fn digest(&self) -> String {
        let errors = self
            .fields
            .get(ERRORS_FIELD)
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        format!(
            "{} fields, attempts={}, satisfied={}, decision={}, errors={}",
            self.fields.len(),
            self.control.optimization_attempts,
            self.control.budget_satisfied,
            self.control.human_decision,
            errors
        )
    }
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_control(mut self, patch: ControlPatch) -> Self {
        self.control.absorb(patch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.control.is_empty()
    }

    /// Check every field against the schema without applying anything
    pub fn validate(&self, schema: &StateSchema) -> Result<(), StateError> {
        for (key, value) in &self.fields {
            let def = schema
                .get(key)
                .ok_or_else(|| StateError::UnknownField(key.clone()))?;
            let ok = match def.reducer {
                ReducerType::Append => value.is_array(),
                ReducerType::Overwrite => def.field_type.accepts(value),
            };
            if !ok {
                return Err(StateError::TypeMismatch {
                    field: key.clone(),
                    expected: def.field_type.to_string(),
                    found: json_type_name(value).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fold a later update into this one.
    ///
    /// Overwrite fields and control keys: the later value wins. Append fields:
    /// the later items follow the earlier ones.
    pub fn absorb(&mut self, later: StateUpdate, schema: &StateSchema) {
        for (key, value) in later.fields {
            let append = schema
                .get(&key)
                .is_some_and(|d| d.reducer == ReducerType::Append);
            if append {
                if let (Some(Value::Array(existing)), Value::Array(items)) =
                    (self.fields.get_mut(&key), &value)
                {
                    existing.extend(items.iter().cloned());
                    continue;
                }
            }
            self.fields.insert(key, value);
        }
        self.control.absorb(later.control);
    }
}
