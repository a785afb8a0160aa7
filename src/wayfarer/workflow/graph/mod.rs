// SPDX-License-Identifier: MIT

//! Graph workflow types and execution engine

pub mod executor;
pub mod types;

pub use executor::{merge_branch_updates, BranchResult, EngineLimits, WorkflowEngine};
pub use types::{
    CompiledGraph, CompiledNode, EntryPoints, GraphDefinition, LoopBound, NodeDefinition,
    NodeKind, NodeType, RouteDefinition, Target, END, TERMINATE,
};
