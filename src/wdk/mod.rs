// SPDX-License-Identifier: MIT

//! Workflow development kit: the contracts nodes and tools implement.

pub mod error;
pub mod node;
pub mod tool;

pub use error::{GraphDefinitionError, Result, StateError, WayfarerError};
pub use node::{executor_fn, FnExecutor, NodeExecutor, NodeResult};
pub use tool::Tool;
