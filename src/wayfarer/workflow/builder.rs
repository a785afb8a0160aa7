// SPDX-License-Identifier: MIT

//! Graph builder and compiler
//!
//! Nodes are collected programmatically or from a [`GraphDefinition`]. `compile`
//! validates the whole graph and yields an immutable [`CompiledGraph`], or the
//! first violation it finds. Nothing is partially compiled.

use crate::wayfarer::workflow::graph::types::{
    CompiledGraph, CompiledNode, GraphDefinition, NodeDefinition, NodeKind, NodeType,
    RouteDefinition, Target, END, TERMINATE,
};
use crate::wayfarer::workflow::registry::{NodeRegistry, ToolRegistry};
use crate::wayfarer::workflow::router::Router;
use crate::wayfarer::workflow::state::{FieldType, StateSchema};
use crate::wdk::error::GraphDefinitionError;
use crate::wdk::node::NodeExecutor;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

type NodeIndex<'a> = HashMap<&'a str, &'a NodeDefinition>;

/// Collects node definitions and their executors before compilation
pub struct GraphBuilder {
    name: String,
    description: String,
    entry: Vec<String>,
    input_field: String,
    schema: StateSchema,
    nodes: Vec<NodeDefinition>,
    /// Executors keyed by node id
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entry: vec![],
            input_field: "query".to_string(),
            schema: StateSchema::new(),
            nodes: vec![],
            executors: HashMap::new(),
        }
    }

    /// Start from a parsed definition, resolving executor names against `registry`
    pub async fn from_definition(
        def: GraphDefinition,
        registry: &NodeRegistry,
    ) -> Result<Self, GraphDefinitionError> {
        let mut builder = GraphBuilder::new(def.name)
            .description(def.description)
            .input_field(def.input_field)
            .state_schema(def.state);
        builder.entry = def.entry.to_vec();

        for node in def.nodes {
            let executor = match &node.executor {
                Some(name) => Some(registry.get(name).await.ok_or_else(|| {
                    GraphDefinitionError::UnknownExecutor {
                        node: node.id.clone(),
                        executor: name.clone(),
                    }
                })?),
                None => None,
            };
            builder = builder.add_node(node, executor);
        }
        Ok(builder)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input_field(mut self, field: impl Into<String>) -> Self {
        self.input_field = field.into();
        self
    }

    pub fn state_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Declare an entry node. Declaring more than one fails compilation.
    pub fn set_entry(mut self, id: impl Into<String>) -> Self {
        self.entry.push(id.into());
        self
    }

    pub fn add_node(
        mut self,
        mut def: NodeDefinition,
        executor: Option<Arc<dyn NodeExecutor>>,
    ) -> Self {
        if let Some(executor) = executor {
            def.executor = Some(executor.name().to_string());
            self.executors.insert(def.id.clone(), executor);
        }
        self.nodes.push(def);
        self
    }

    pub fn add_sequential(self, id: &str, executor: Arc<dyn NodeExecutor>, next: &str) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Sequential);
        def.next = Some(next.to_string());
        self.add_node(def, Some(executor))
    }

    pub fn add_branch(self, id: &str, executor: Arc<dyn NodeExecutor>) -> Self {
        self.add_node(NodeDefinition::new(id, NodeType::Branch), Some(executor))
    }

    /// Tool node; `args` maps tool argument names to state paths
    pub fn add_tool(
        self,
        id: &str,
        tool: &str,
        args: &[(&str, &str)],
        result_field: &str,
        next: &str,
    ) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Tool);
        def.tool = Some(tool.to_string());
        def.args = args
            .iter()
            .map(|(arg, path)| (arg.to_string(), path.to_string()))
            .collect();
        def.result_field = Some(result_field.to_string());
        def.next = Some(next.to_string());
        self.add_node(def, None)
    }

    pub fn add_parallel(
        self,
        id: &str,
        branches: &[&str],
        max_workers: Option<usize>,
        next: &str,
    ) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Parallel);
        def.branches = branches.iter().map(|b| b.to_string()).collect();
        def.max_workers = max_workers;
        def.next = Some(next.to_string());
        self.add_node(def, None)
    }

    pub fn add_join(self, id: &str, executor: Option<Arc<dyn NodeExecutor>>, next: &str) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Join);
        def.next = Some(next.to_string());
        self.add_node(def, executor)
    }

    pub fn add_conditional(
        self,
        id: &str,
        executor: Option<Arc<dyn NodeExecutor>>,
        route: RouteDefinition,
    ) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Conditional);
        def.route = Some(route);
        self.add_node(def, executor)
    }

    pub fn add_suspend(
        self,
        id: &str,
        executor: Option<Arc<dyn NodeExecutor>>,
        next: &str,
    ) -> Self {
        let mut def = NodeDefinition::new(id, NodeType::Suspend);
        def.next = Some(next.to_string());
        self.add_node(def, executor)
    }

    pub fn add_terminal(self, id: &str) -> Self {
        self.add_node(NodeDefinition::new(id, NodeType::Terminal), None)
    }

    /// Validate the graph and resolve tools.
    ///
    /// Checks run in a fixed order (schema, duplicates, entry, node shape,
    /// edge targets, routes, branch sets, reachability, tools) and the first
    /// failure is returned.
    pub async fn compile(self, tools: &ToolRegistry) -> Result<CompiledGraph, GraphDefinitionError> {
        let schema = self.schema.clone().with_reserved();
        schema.validate()?;
        match schema.get(&self.input_field) {
            Some(def) if def.field_type == FieldType::String => {}
            _ => {
                return Err(GraphDefinitionError::InvalidSchema(format!(
                    "input field '{}' must be a declared string field",
                    self.input_field
                )))
            }
        }

        let mut index: NodeIndex = HashMap::new();
        for node in &self.nodes {
            if index.insert(node.id.as_str(), node).is_some() {
                return Err(GraphDefinitionError::DuplicateNode(node.id.clone()));
            }
        }

        let entry = match self.entry.as_slice() {
            [] => return Err(GraphDefinitionError::MissingEntry),
            [only] => only.clone(),
            many => return Err(GraphDefinitionError::MultipleEntries(many.to_vec())),
        };
        if !index.contains_key(entry.as_str()) {
            return Err(GraphDefinitionError::UnknownNode {
                from: "entry".to_string(),
                to: entry,
            });
        }

        for node in &self.nodes {
            let has_executor = node.executor.is_some() || self.executors.contains_key(&node.id);
            check_shape(node, has_executor)?;
        }

        for node in &self.nodes {
            for target in node.successors() {
                if target != END && target != TERMINATE && !index.contains_key(target) {
                    return Err(GraphDefinitionError::UnknownNode {
                        from: node.id.clone(),
                        to: target.to_string(),
                    });
                }
            }
        }

        check_routes(&self.nodes, &schema)?;
        check_branches(&self.nodes, &index, &entry)?;
        check_fields(&self.nodes, &schema)?;

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([entry.as_str()]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(node) = index.get(id) {
                queue.extend(
                    node.successors()
                        .into_iter()
                        .filter(|next| index.contains_key(next)),
                );
            }
        }
        if let Some(node) = self
            .nodes
            .iter()
            .find(|n| !reachable.contains(n.id.as_str()))
        {
            return Err(GraphDefinitionError::Unreachable(node.id.clone()));
        }

        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for def in &self.nodes {
            let kind = self.compile_kind(def, tools).await?;
            order.push(def.id.clone());
            nodes.insert(
                def.id.clone(),
                CompiledNode {
                    id: def.id.clone(),
                    kind,
                },
            );
        }

        log::info!(
            "Compiled graph '{}' with {} nodes (entry '{}')",
            self.name,
            order.len(),
            entry
        );

        Ok(CompiledGraph {
            name: self.name,
            description: self.description,
            entry,
            input_field: self.input_field,
            schema,
            nodes,
            order,
        })
    }

    fn resolve_executor(
        &self,
        def: &NodeDefinition,
    ) -> Result<Option<Arc<dyn NodeExecutor>>, GraphDefinitionError> {
        match (self.executors.get(&def.id), &def.executor) {
            (Some(executor), _) => Ok(Some(Arc::clone(executor))),
            (None, Some(name)) => Err(GraphDefinitionError::UnknownExecutor {
                node: def.id.clone(),
                executor: name.clone(),
            }),
            (None, None) => Ok(None),
        }
    }

    async fn compile_kind(
        &self,
        def: &NodeDefinition,
        tools: &ToolRegistry,
    ) -> Result<NodeKind, GraphDefinitionError> {
        let executor = self.resolve_executor(def)?;
        let next = || {
            def.next
                .as_deref()
                .map(Target::parse)
                .ok_or_else(|| GraphDefinitionError::MissingEdge(def.id.clone()))
        };
        let required =
            |executor: Option<Arc<dyn NodeExecutor>>| -> Result<_, GraphDefinitionError> {
                executor.ok_or_else(|| GraphDefinitionError::MissingExecutor(def.id.clone()))
            };
        let missing = |field: &str| GraphDefinitionError::MissingField {
            node: def.id.clone(),
            field: field.to_string(),
        };

        let kind = match def.kind {
            NodeType::Sequential => NodeKind::Sequential {
                executor: required(executor)?,
                next: next()?,
            },
            NodeType::Branch => NodeKind::Branch {
                executor: required(executor)?,
            },
            NodeType::Tool => {
                let name = def.tool.as_deref().ok_or_else(|| missing("tool"))?;
                let tool = tools
                    .get(name)
                    .await
                    .ok_or_else(|| GraphDefinitionError::UnknownTool {
                        node: def.id.clone(),
                        tool: name.to_string(),
                    })?;
                NodeKind::Tool {
                    tool,
                    args: def.args.clone(),
                    result_field: def
                        .result_field
                        .clone()
                        .ok_or_else(|| missing("result_field"))?,
                    next: next()?,
                }
            }
            NodeType::Parallel => NodeKind::Parallel {
                branches: def.branches.clone(),
                max_workers: def.max_workers,
                next: next()?,
            },
            NodeType::Join => NodeKind::Join {
                executor,
                next: next()?,
            },
            NodeType::Conditional => {
                let route = def.route.as_ref().ok_or_else(|| missing("route"))?;
                NodeKind::Conditional {
                    executor,
                    router: route.router.clone(),
                    outcomes: route
                        .outcomes
                        .iter()
                        .map(|(outcome, target)| (outcome.clone(), Target::parse(target)))
                        .collect(),
                    loop_bound: route.loop_bound.clone(),
                }
            }
            NodeType::Suspend => NodeKind::Suspend {
                executor,
                next: next()?,
            },
            NodeType::Terminal => NodeKind::Terminal { executor },
        };
        Ok(kind)
    }
}

fn check_shape(node: &NodeDefinition, has_executor: bool) -> Result<(), GraphDefinitionError> {
    let unexpected = |field: &str| GraphDefinitionError::UnexpectedEdge {
        node: node.id.clone(),
        field: field.to_string(),
    };
    let missing = |field: &str| GraphDefinitionError::MissingField {
        node: node.id.clone(),
        field: field.to_string(),
    };

    if matches!(node.kind, NodeType::Sequential | NodeType::Branch) && !has_executor {
        return Err(GraphDefinitionError::MissingExecutor(node.id.clone()));
    }
    if matches!(node.kind, NodeType::Parallel | NodeType::Tool) && has_executor {
        return Err(unexpected("executor"));
    }
    if node.kind != NodeType::Parallel && !node.branches.is_empty() {
        return Err(unexpected("branches"));
    }
    if node.kind != NodeType::Conditional && node.route.is_some() {
        return Err(unexpected("route"));
    }
    if node.kind != NodeType::Tool && node.tool.is_some() {
        return Err(unexpected("tool"));
    }

    match node.kind {
        NodeType::Branch | NodeType::Terminal | NodeType::Conditional => {
            if node.next.is_some() {
                return Err(unexpected("next"));
            }
        }
        _ => {
            if node.next.is_none() {
                return Err(GraphDefinitionError::MissingEdge(node.id.clone()));
            }
        }
    }

    match node.kind {
        NodeType::Tool => {
            if node.tool.is_none() {
                return Err(missing("tool"));
            }
            if node.result_field.is_none() {
                return Err(missing("result_field"));
            }
        }
        NodeType::Conditional => {
            let route = node.route.as_ref().ok_or_else(|| missing("route"))?;
            if route.outcomes.is_empty() {
                return Err(GraphDefinitionError::MissingEdge(node.id.clone()));
            }
        }
        NodeType::Suspend => {
            if matches!(node.next.as_deref(), Some(END) | Some(TERMINATE)) {
                return Err(GraphDefinitionError::InvalidSuspend(node.id.clone()));
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_routes(nodes: &[NodeDefinition], schema: &StateSchema) -> Result<(), GraphDefinitionError> {
    let mut counters: HashMap<&str, &str> = HashMap::new();

    for node in nodes {
        let Some(route) = &node.route else {
            continue;
        };

        if let Some(declared) = route.router.declared_outcomes() {
            if let Some(outcome) = declared
                .into_iter()
                .find(|o| !route.outcomes.contains_key(o))
            {
                return Err(GraphDefinitionError::UnmappedOutcome {
                    node: node.id.clone(),
                    outcome,
                });
            }
        }

        if let Router::FieldValue { field } | Router::ScoreLoop { field, .. } = &route.router {
            let root = field.split('.').next().unwrap_or_default();
            if schema.get(root).is_none() {
                return Err(GraphDefinitionError::InvalidSchema(format!(
                    "router on '{}' reads undeclared field '{}'",
                    node.id, root
                )));
            }
        }

        if let Some(bound) = &route.loop_bound {
            let invalid = |reason: String| GraphDefinitionError::InvalidLoopBound {
                node: node.id.clone(),
                reason,
            };
            for outcome in [&bound.continue_outcome, &bound.escape_outcome] {
                if !route.outcomes.contains_key(outcome) {
                    return Err(invalid(format!("outcome '{}' is not mapped", outcome)));
                }
            }
            if bound.continue_outcome == bound.escape_outcome {
                return Err(invalid(
                    "continue and escape outcomes must differ".to_string(),
                ));
            }
            if bound.max_attempts == Some(0) {
                return Err(invalid("max_attempts must be at least 1".to_string()));
            }
            if let Some(other) = counters.insert(bound.counter.as_str(), node.id.as_str()) {
                return Err(invalid(format!(
                    "loop counter '{}' is already used by '{}'",
                    bound.counter, other
                )));
            }
        }
    }
    Ok(())
}

fn check_branches(
    nodes: &[NodeDefinition],
    index: &NodeIndex,
    entry: &str,
) -> Result<(), GraphDefinitionError> {
    let is_branch = |id: &str| index.get(id).is_some_and(|n| n.kind == NodeType::Branch);
    let mut owner: HashMap<&str, &str> = HashMap::new();

    for node in nodes.iter().filter(|n| n.kind == NodeType::Parallel) {
        let invalid = |reason: String| GraphDefinitionError::InvalidBranch {
            node: node.id.clone(),
            reason,
        };
        if node.branches.is_empty() {
            return Err(invalid("no branches declared".to_string()));
        }
        if node.max_workers == Some(0) {
            return Err(invalid("max_workers must be at least 1".to_string()));
        }
        for branch in &node.branches {
            if !is_branch(branch) {
                return Err(invalid(format!("'{}' is not a branch node", branch)));
            }
            if let Some(previous) = owner.insert(branch.as_str(), node.id.as_str()) {
                return Err(invalid(format!(
                    "'{}' already belongs to '{}'",
                    branch, previous
                )));
            }
        }
        let joins = node
            .next
            .as_deref()
            .and_then(|next| index.get(next))
            .is_some_and(|n| n.kind == NodeType::Join);
        if !joins {
            return Err(invalid("must continue to a join node".to_string()));
        }
    }

    if is_branch(entry) {
        return Err(GraphDefinitionError::InvalidBranch {
            node: entry.to_string(),
            reason: "a branch node cannot be the entry".to_string(),
        });
    }
    for node in nodes {
        let mut direct: Vec<&str> = node.next.iter().map(String::as_str).collect();
        if let Some(route) = &node.route {
            direct.extend(route.outcomes.values().map(String::as_str));
        }
        if let Some(target) = direct.into_iter().find(|t| is_branch(t)) {
            return Err(GraphDefinitionError::InvalidBranch {
                node: target.to_string(),
                reason: format!("targeted directly by '{}'", node.id),
            });
        }
    }
    Ok(())
}

fn check_fields(nodes: &[NodeDefinition], schema: &StateSchema) -> Result<(), GraphDefinitionError> {
    for node in nodes.iter().filter(|n| n.kind == NodeType::Tool) {
        if let Some(field) = &node.result_field {
            if schema.get(field).is_none() {
                return Err(GraphDefinitionError::InvalidSchema(format!(
                    "tool node '{}' writes undeclared field '{}'",
                    node.id, field
                )));
            }
        }
    }
    Ok(())
}
