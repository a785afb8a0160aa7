// SPDX-License-Identifier: MIT

//! Workflow state: schema, control block and runtime store

pub mod control;
pub mod schema;
pub mod store;

pub use control::{ControlBlock, ControlPatch, HumanDecision, ParseDecisionError, OPTIMIZATION_COUNTER};
pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema, ERRORS_FIELD};
pub use store::{StateUpdate, WorkflowState};
