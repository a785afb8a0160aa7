// SPDX-License-Identifier: MIT

//! Node executor contract

use crate::wayfarer::workflow::state::{StateUpdate, WorkflowState};
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;

/// Result of a single node execution
pub type NodeResult = Result<StateUpdate, Box<dyn Error + Send + Sync>>;

/// Trait for the computation behind a graph node.
///
/// Executors see the session state read-only and hand back a partial update.
/// The engine owns merging, persistence and the control counters.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Registry name of this executor
    fn name(&self) -> &str;

    /// Compute a partial update from the current state
    async fn execute(&self, state: &WorkflowState) -> NodeResult;
}

/// Executor backed by a plain function
pub struct FnExecutor<F> {
    name: String,
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&WorkflowState) -> NodeResult + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> NodeExecutor for FnExecutor<F>
where
    F: Fn(&WorkflowState) -> NodeResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: &WorkflowState) -> NodeResult {
        (self.func)(state)
    }
}

/// Wrap a function as a shareable executor
pub fn executor_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn NodeExecutor>
where
    F: Fn(&WorkflowState) -> NodeResult + Send + Sync + 'static,
{
    Arc::new(FnExecutor::new(name, func))
}
