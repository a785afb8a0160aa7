// SPDX-License-Identifier: MIT

//! Graph workflow type definitions
//!
//! `GraphDefinition` is the declarative (YAML) shape. `CompiledGraph` is the
//! validated, immutable form the engine walks.

use crate::wayfarer::workflow::router::Router;
use crate::wayfarer::workflow::state::{
    StateSchema, StateUpdate, WorkflowState, OPTIMIZATION_COUNTER,
};
use crate::wdk::error::StateError;
use crate::wdk::node::NodeExecutor;
use crate::wdk::tool::Tool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Edge target meaning "session completed"
pub const END: &str = "__end__";
/// Edge target meaning "session terminated"
pub const TERMINATE: &str = "__terminate__";

fn default_input_field() -> String {
    "query".to_string()
}

fn default_loop_counter() -> String {
    OPTIMIZATION_COUNTER.to_string()
}

/// A graph-based workflow definition
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GraphDefinition {
    /// Name of the workflow
    pub name: String,
    /// Description of the workflow
    #[serde(default)]
    pub description: String,
    /// Entry node
    #[serde(default)]
    pub entry: EntryPoints,
    /// State field that receives the initial query
    #[serde(default = "default_input_field")]
    pub input_field: String,
    /// State schema
    #[serde(default)]
    pub state: StateSchema,
    /// Nodes in the graph
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

/// Entry point declaration: a single node id or a list
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(untagged)]
pub enum EntryPoints {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl EntryPoints {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            EntryPoints::None => vec![],
            EntryPoints::Single(s) => vec![s.clone()],
            EntryPoints::Multiple(v) => v.clone(),
        }
    }
}

/// Node kind as written in a definition
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Execute, merge, follow `next`
    Sequential,
    /// Member of a parallel branch set; no edges of its own
    Branch,
    /// Invoke a registered tool
    Tool,
    /// Fan out to `branches`, then continue to a join
    Parallel,
    /// Barrier after a parallel node
    Join,
    /// Route through `route`
    Conditional,
    /// Persist and yield for a human decision
    Suspend,
    /// Completes the session
    Terminal,
}

/// A node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeDefinition {
    /// Unique identifier for this node
    pub id: String,
    pub kind: NodeType,
    /// Registered executor name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// Unconditional successor (node id, `__end__` or `__terminate__`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    /// Worker cap for a parallel node; defaults to the branch count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Registered tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool argument name → state path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    /// State field receiving the tool result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteDefinition>,
}

/// Conditional edge: a router plus its outcome → target map
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteDefinition {
    pub router: Router,
    pub outcomes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_bound: Option<LoopBound>,
}

/// Marks a conditional node as a bounded loop.
///
/// Taking `continue_outcome` counts one attempt on `counter`; once the maximum
/// is reached the engine routes to `escape_outcome` whatever the router says.
/// Each loop in a graph owns its own counter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoopBound {
    pub continue_outcome: String,
    pub escape_outcome: String,
    #[serde(default = "default_loop_counter")]
    pub counter: String,
    /// Overrides the engine-wide attempt limit for this loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, kind: NodeType) -> Self {
        Self {
            id: id.into(),
            kind,
            executor: None,
            next: None,
            branches: vec![],
            max_workers: None,
            tool: None,
            args: BTreeMap::new(),
            result_field: None,
            route: None,
        }
    }

    /// Every id this node can hand control to
    pub fn successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.next.iter().map(String::as_str).collect();
        out.extend(self.branches.iter().map(String::as_str));
        if let Some(route) = &self.route {
            out.extend(route.outcomes.values().map(String::as_str));
        }
        out
    }
}

impl RouteDefinition {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            outcomes: BTreeMap::new(),
            loop_bound: None,
        }
    }

    pub fn outcome(mut self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.outcomes.insert(key.into(), target.into());
        self
    }

    pub fn bounded(
        mut self,
        continue_outcome: impl Into<String>,
        escape_outcome: impl Into<String>,
    ) -> Self {
        self.loop_bound = Some(LoopBound {
            continue_outcome: continue_outcome.into(),
            escape_outcome: escape_outcome.into(),
            counter: default_loop_counter(),
            max_attempts: None,
        });
        self
    }

    /// Count this loop's attempts on `counter`. Call after `bounded`.
    pub fn with_counter(mut self, counter: impl Into<String>) -> Self {
        if let Some(bound) = self.loop_bound.as_mut() {
            bound.counter = counter.into();
        }
        self
    }

    /// Per-loop attempt cap. Call after `bounded`.
    pub fn max_attempts(mut self, max: u32) -> Self {
        if let Some(bound) = self.loop_bound.as_mut() {
            bound.max_attempts = Some(max);
        }
        self
    }
}

/// Resolved edge target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    End,
    Terminate,
}

impl Target {
    pub fn parse(target: &str) -> Self {
        match target {
            END => Target::End,
            TERMINATE => Target::Terminate,
            id => Target::Node(id.to_string()),
        }
    }

    /// Id stored as a checkpoint's next node
    pub fn as_str(&self) -> &str {
        match self {
            Target::Node(id) => id,
            Target::End => END,
            Target::Terminate => TERMINATE,
        }
    }
}

/// Validated node ready for execution
pub struct CompiledNode {
    pub id: String,
    pub kind: NodeKind,
}

pub enum NodeKind {
    Sequential {
        executor: Arc<dyn NodeExecutor>,
        next: Target,
    },
    Branch {
        executor: Arc<dyn NodeExecutor>,
    },
    Tool {
        tool: Arc<dyn Tool>,
        args: BTreeMap<String, String>,
        result_field: String,
        next: Target,
    },
    Parallel {
        branches: Vec<String>,
        max_workers: Option<usize>,
        next: Target,
    },
    Join {
        executor: Option<Arc<dyn NodeExecutor>>,
        next: Target,
    },
    Conditional {
        executor: Option<Arc<dyn NodeExecutor>>,
        router: Router,
        outcomes: BTreeMap<String, Target>,
        loop_bound: Option<LoopBound>,
    },
    Suspend {
        executor: Option<Arc<dyn NodeExecutor>>,
        next: Target,
    },
    Terminal {
        executor: Option<Arc<dyn NodeExecutor>>,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Sequential { .. } => "sequential",
            NodeKind::Branch { .. } => "branch",
            NodeKind::Tool { .. } => "tool",
            NodeKind::Parallel { .. } => "parallel",
            NodeKind::Join { .. } => "join",
            NodeKind::Conditional { .. } => "conditional",
            NodeKind::Suspend { .. } => "suspend",
            NodeKind::Terminal { .. } => "terminal",
        }
    }
}

/// Immutable, validated graph shared read-only by every session
pub struct CompiledGraph {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) entry: String,
    pub(crate) input_field: String,
    pub(crate) schema: StateSchema,
    pub(crate) nodes: HashMap<String, CompiledNode>,
    pub(crate) order: Vec<String>,
}

impl CompiledGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.get(id)
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    /// Fresh state for a new session, with the query in the input field
    pub fn initial_state(&self, query: &str) -> Result<WorkflowState, StateError> {
        let mut state = WorkflowState::new(&self.schema);
        state.apply(
            StateUpdate::new().set(self.input_field.clone(), query),
            &self.schema,
        )?;
        Ok(state)
    }
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<String> = self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|n| format!("{}:{}", n.id, n.kind.label()))
            .collect();
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_points_forms() {
        let single: EntryPoints = serde_yaml::from_str("parse_intent").unwrap();
        assert_eq!(single.to_vec(), vec!["parse_intent"]);

        let multiple: EntryPoints = serde_yaml::from_str("[a, b]").unwrap();
        assert_eq!(multiple.to_vec().len(), 2);
    }

    #[test]
    fn test_target_markers() {
        assert_eq!(Target::parse(END), Target::End);
        assert_eq!(Target::parse(TERMINATE), Target::Terminate);
        assert_eq!(Target::parse("review"), Target::Node("review".to_string()));
        assert_eq!(Target::Terminate.as_str(), TERMINATE);
    }

    #[test]
    fn test_node_definition_yaml() {
        let yaml = r#"
id: optimize_budget
kind: conditional
executor: optimize_budget
route:
  router:
    type: budget_loop
  outcomes:
    continue: optimize_budget
    satisfied: generate_itinerary
    human_intervention: human_review
  loop_bound:
    continue_outcome: continue
    escape_outcome: human_intervention
"#;
        let node: NodeDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.kind, NodeType::Conditional);
        let route = node.route.as_ref().unwrap();
        assert_eq!(route.router, Router::BudgetLoop);
        assert_eq!(route.outcomes.len(), 3);
        let bound = route.loop_bound.as_ref().unwrap();
        assert_eq!(bound.escape_outcome, "human_intervention");
        assert_eq!(bound.counter, OPTIMIZATION_COUNTER);
        assert_eq!(bound.max_attempts, None);
        assert_eq!(node.successors().len(), 3);
    }

    #[test]
    fn test_loop_bound_named_counter() {
        let yaml = r#"
continue_outcome: continue
escape_outcome: human_intervention
counter: itinerary
max_attempts: 2
"#;
        let bound: LoopBound = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(bound.counter, "itinerary");
        assert_eq!(bound.max_attempts, Some(2));
    }
}
