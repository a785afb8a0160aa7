// SPDX-License-Identifier: MIT

//! Graph execution engine
//!
//! Walks a compiled graph for one session. Each node ends in exactly one
//! persisted checkpoint, and the engine never moves past a node whose result
//! was not saved. Suspension is a persisted yield: the engine returns and a
//! later call rebuilds everything from the latest checkpoint.

use super::types::{CompiledGraph, LoopBound, NodeKind, Target};
use crate::wayfarer::persistence::{Checkpoint, CheckpointStore};
use crate::wayfarer::session::model::SessionStatus;
use crate::wayfarer::workflow::router::Router;
use crate::wayfarer::workflow::state::{
    HumanDecision, StateSchema, StateUpdate, WorkflowState, ERRORS_FIELD,
};
use crate::wdk::error::{Result, WayfarerError};
use crate::wdk::node::NodeExecutor;
use crate::wdk::tool::Tool;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of one parallel branch, tagged with the branch node id
pub type BranchResult = (String, std::result::Result<StateUpdate, String>);

/// Engine-level limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Continue traversals allowed on a bounded loop before the escape is
    /// forced, unless the loop sets its own `max_attempts`
    pub max_optimization_attempts: u32,
    /// Upper bound on concurrent branches of a fan-out
    pub max_parallel_workers: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_optimization_attempts: 3,
            max_parallel_workers: 8,
        }
    }
}

/// Position of a session between two steps
struct Cursor {
    session_id: String,
    step_seq: u64,
    next_node: String,
    state: WorkflowState,
}

impl Cursor {
    fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            session_id: checkpoint.session_id,
            step_seq: checkpoint.step_seq,
            next_node: checkpoint.next_node_id,
            state: checkpoint.state,
        }
    }
}

/// Drives sessions through a shared compiled graph
pub struct WorkflowEngine {
    graph: Arc<CompiledGraph>,
    store: Arc<dyn CheckpointStore>,
    limits: EngineLimits,
}

impl WorkflowEngine {
    pub fn new(
        graph: Arc<CompiledGraph>,
        store: Arc<dyn CheckpointStore>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            graph,
            store,
            limits,
        }
    }

    pub fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Execute exactly one node of an active session
    pub async fn step(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus> {
        let mut cursor = self.load_active(session_id).await?;
        self.advance(&mut cursor, cancel).await
    }

    /// Drive an active session until it suspends, finishes or fails.
    ///
    /// The checkpoint is loaded once; afterwards the cursor is kept in step
    /// with what has been saved.
    pub async fn run(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus> {
        let mut cursor = self.load_active(session_id).await?;
        loop {
            let status = self.advance(&mut cursor, cancel).await?;
            if status != SessionStatus::Active {
                return Ok(status);
            }
        }
    }

    /// Record a human decision on a suspended session and make it active again.
    ///
    /// The decision and the status change are one checkpoint, so the session
    /// is never active without its decision.
    pub async fn apply_decision(&self, session_id: &str, decision: HumanDecision) -> Result<()> {
        let loaded = self.store.load_latest(session_id).await?;
        if loaded.session.status != SessionStatus::SuspendedForHuman {
            return Err(WayfarerError::session_state(format!(
                "session {} is {}, not awaiting a decision",
                session_id, loaded.session.status
            )));
        }

        let mut state = loaded.checkpoint.state.clone();
        state.control_mut().human_decision = decision;
        let next = loaded
            .checkpoint
            .successor(loaded.checkpoint.next_node_id.clone(), state);
        self.store.save(&next, SessionStatus::Active).await?;

        log::info!(
            "Session {} received decision '{}', continuing at '{}'",
            session_id,
            decision,
            next.next_node_id
        );
        Ok(())
    }

    async fn load_active(&self, session_id: &str) -> Result<Cursor> {
        let loaded = self.store.load_latest(session_id).await?;
        if loaded.session.status != SessionStatus::Active {
            return Err(WayfarerError::session_state(format!(
                "session {} is {}, not active",
                session_id, loaded.session.status
            )));
        }
        Ok(Cursor::from_checkpoint(loaded.checkpoint))
    }

    /// Run the next node. A cancellation seen before the node starts, or
    /// raised while it ran, terminates the session at this step boundary.
    async fn advance(
        &self,
        cursor: &mut Cursor,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus> {
        if cancel.is_cancelled() {
            return self.cancelled(cursor).await;
        }

        let status = self.execute_node(cursor, cancel).await?;
        if cancel.is_cancelled()
            && matches!(
                status,
                SessionStatus::Active | SessionStatus::SuspendedForHuman
            )
        {
            return self.cancelled(cursor).await;
        }
        Ok(status)
    }

    async fn execute_node(
        &self,
        cursor: &mut Cursor,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus> {
        let node = self.graph.node(&cursor.next_node).ok_or_else(|| {
            WayfarerError::session_state(format!(
                "session {} points at '{}', which is not a node of graph '{}'",
                cursor.session_id,
                cursor.next_node,
                self.graph.name()
            ))
        })?;

        log::info!(
            "Session {} step {}: {} node '{}'",
            cursor.session_id,
            cursor.step_seq + 1,
            node.kind.label(),
            node.id
        );

        match &node.kind {
            NodeKind::Sequential { executor, next } => {
                let state = self.run_executor(cursor, &node.id, Some(executor)).await?;
                self.commit(cursor, state, next, false).await
            }
            NodeKind::Join { executor, next } => {
                let state = self.run_executor(cursor, &node.id, executor.as_ref()).await?;
                self.commit(cursor, state, next, false).await
            }
            NodeKind::Suspend { executor, next } => {
                let state = self.run_executor(cursor, &node.id, executor.as_ref()).await?;
                let status = self.commit(cursor, state, next, true).await?;
                log::info!(
                    "Session {} suspended at '{}', awaiting a human decision",
                    cursor.session_id,
                    node.id
                );
                Ok(status)
            }
            NodeKind::Terminal { executor } => {
                let state = self.run_executor(cursor, &node.id, executor.as_ref()).await?;
                self.commit(cursor, state, &Target::End, false).await
            }
            NodeKind::Tool {
                tool,
                args,
                result_field,
                next,
            } => {
                self.run_tool(cursor, &node.id, tool, args, result_field, next)
                    .await
            }
            NodeKind::Parallel {
                branches,
                max_workers,
                next,
            } => {
                self.run_parallel(cursor, &node.id, branches, *max_workers, next, cancel)
                    .await
            }
            NodeKind::Conditional {
                executor,
                router,
                outcomes,
                loop_bound,
            } => {
                self.run_conditional(
                    cursor,
                    &node.id,
                    executor.as_ref(),
                    router,
                    outcomes,
                    loop_bound.as_ref(),
                )
                .await
            }
            NodeKind::Branch { .. } => Err(WayfarerError::session_state(format!(
                "branch node '{}' only runs inside its fan-out",
                node.id
            ))),
        }
    }

    /// Run an optional executor against the cursor state and merge its update
    async fn run_executor(
        &self,
        cursor: &Cursor,
        node_id: &str,
        executor: Option<&Arc<dyn NodeExecutor>>,
    ) -> Result<WorkflowState> {
        let mut state = cursor.state.clone();
        let Some(executor) = executor else {
            return Ok(state);
        };

        let executor = Arc::clone(executor);
        let snapshot = cursor.state.clone();
        let outcome = isolated(async move {
            executor.execute(&snapshot).await.map_err(|e| e.to_string())
        })
        .await;
        let update = match outcome {
            Ok(update) => update,
            Err(message) => return Err(self.fail(cursor, node_id, message).await),
        };
        if let Err(e) = state.apply(update, self.graph.schema()) {
            return Err(self
                .fail(cursor, node_id, format!("update rejected: {}", e))
                .await);
        }
        Ok(state)
    }

    async fn run_tool(
        &self,
        cursor: &mut Cursor,
        node_id: &str,
        tool: &Arc<dyn Tool>,
        args: &BTreeMap<String, String>,
        result_field: &str,
        next: &Target,
    ) -> Result<SessionStatus> {
        if cursor.state.control().is_tool_complete(node_id) {
            log::info!(
                "Tool node '{}' already completed in session {}, not invoking '{}' again",
                node_id,
                cursor.session_id,
                tool.name()
            );
            let state = cursor.state.clone();
            return self.commit(cursor, state, next, false).await;
        }

        let mut payload = serde_json::Map::new();
        for (arg, path) in args {
            if let Some(value) = cursor.state.get_path(path) {
                payload.insert(arg.clone(), value.clone());
            }
        }

        let invocation = {
            let tool = Arc::clone(tool);
            isolated(async move {
                tool.invoke(Value::Object(payload))
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
        };
        let summary = match invocation {
            Ok(summary) => summary,
            Err(e) => {
                return Err(self
                    .fail(cursor, node_id, format!("tool '{}' failed: {}", tool.name(), e))
                    .await)
            }
        };
        log::info!("Tool '{}' finished: {}", tool.name(), summary);

        let mut state = cursor.state.clone();
        if let Err(e) = state.apply(
            StateUpdate::new().set(result_field, summary),
            self.graph.schema(),
        ) {
            return Err(self
                .fail(cursor, node_id, format!("update rejected: {}", e))
                .await);
        }
        // Marked in the same checkpoint that records the result
        state
            .control_mut()
            .completed_tools
            .insert(node_id.to_string());
        self.commit(cursor, state, next, false).await
    }

    async fn run_parallel(
        &self,
        cursor: &mut Cursor,
        node_id: &str,
        branches: &[String],
        max_workers: Option<usize>,
        next: &Target,
        cancel: &CancellationToken,
    ) -> Result<SessionStatus> {
        let snapshot = Arc::new(cursor.state.clone());
        let workers = max_workers
            .unwrap_or(branches.len())
            .min(self.limits.max_parallel_workers)
            .max(1);
        log::info!(
            "Fanning out {} branches from '{}' with {} workers",
            branches.len(),
            node_id,
            workers
        );

        let mut tasks = Vec::with_capacity(branches.len());
        for id in branches {
            let executor = match self.graph.node(id).map(|n| &n.kind) {
                Some(NodeKind::Branch { executor }) => Arc::clone(executor),
                _ => {
                    return Err(WayfarerError::session_state(format!(
                        "'{}' is not a branch node",
                        id
                    )))
                }
            };
            let snapshot = Arc::clone(&snapshot);
            let id = id.clone();
            tasks.push(async move {
                let result = isolated(async move {
                    executor.execute(&snapshot).await.map_err(|e| e.to_string())
                })
                .await;
                (id, result)
            });
        }
        // `buffered` yields in registration order whatever the completion order
        let joined = stream::iter(tasks).buffered(workers).collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!(
                    "Session {} cancelled during fan-out at '{}'; branch results discarded",
                    cursor.session_id,
                    node_id
                );
                return self.cancelled(cursor).await;
            }
            results = joined => results,
        };

        let schema = self.graph.schema();
        let (merged, succeeded) = merge_branch_updates(schema, results);
        let mut state = cursor.state.clone();
        if let Err(e) = state.apply(merged, schema) {
            return Err(self
                .fail(cursor, node_id, format!("merged update rejected: {}", e))
                .await);
        }

        if succeeded == 0 {
            // Keep the recorded errors and leave the fan-out as the resume point
            let checkpoint =
                Checkpoint::new(&cursor.session_id, cursor.step_seq + 1, node_id, state);
            self.store.save(&checkpoint, SessionStatus::Failed).await?;
            log::error!(
                "All {} branches of '{}' failed in session {}",
                branches.len(),
                node_id,
                cursor.session_id
            );
            let last_step = checkpoint.step_seq;
            *cursor = Cursor::from_checkpoint(checkpoint);
            return Err(WayfarerError::NodeExecution {
                session_id: cursor.session_id.clone(),
                node: node_id.to_string(),
                last_step,
                message: format!("all {} branches failed", branches.len()),
            });
        }

        self.commit(cursor, state, next, false).await
    }

    async fn run_conditional(
        &self,
        cursor: &mut Cursor,
        node_id: &str,
        executor: Option<&Arc<dyn NodeExecutor>>,
        router: &Router,
        outcomes: &BTreeMap<String, Target>,
        loop_bound: Option<&LoopBound>,
    ) -> Result<SessionStatus> {
        let mut state = self.run_executor(cursor, node_id, executor).await?;

        let routed = router.route(&state);
        let outcome = match loop_bound {
            Some(bound)
                if state.control().attempts(&bound.counter)
                    >= bound
                        .max_attempts
                        .unwrap_or(self.limits.max_optimization_attempts) =>
            {
                if routed != bound.escape_outcome {
                    log::warn!(
                        "Loop '{}' at '{}' reached {} attempts in session {}; forcing '{}' over '{}'",
                        bound.counter,
                        node_id,
                        state.control().attempts(&bound.counter),
                        cursor.session_id,
                        bound.escape_outcome,
                        routed
                    );
                }
                bound.escape_outcome.clone()
            }
            _ => routed,
        };

        let Some(target) = outcomes.get(&outcome) else {
            log::error!(
                "Router on '{}' returned undeclared outcome '{}' in session {}",
                node_id,
                outcome,
                cursor.session_id
            );
            if let Err(e) = self
                .store
                .set_status(&cursor.session_id, SessionStatus::Failed)
                .await
            {
                log::error!("Could not mark session {} failed: {}", cursor.session_id, e);
            }
            return Err(WayfarerError::RouterOutcome {
                session_id: cursor.session_id.clone(),
                node: node_id.to_string(),
                outcome,
                last_step: cursor.step_seq,
            });
        };

        if let Some(bound) = loop_bound.filter(|b| b.continue_outcome == outcome) {
            state.control_mut().record_attempt(&bound.counter);
        }
        log::info!(
            "Router on '{}' chose '{}' -> {}",
            node_id,
            outcome,
            target.as_str()
        );
        self.commit(cursor, state, target, false).await
    }

    /// Persist the step and move the cursor. On a store error the cursor and
    /// session status are untouched, so the node runs again on resume.
    async fn commit(
        &self,
        cursor: &mut Cursor,
        state: WorkflowState,
        target: &Target,
        suspend: bool,
    ) -> Result<SessionStatus> {
        let status = match target {
            Target::Node(_) if suspend => SessionStatus::SuspendedForHuman,
            Target::Node(_) => SessionStatus::Active,
            Target::End => SessionStatus::Completed,
            Target::Terminate => SessionStatus::Terminated,
        };

        let checkpoint = Checkpoint::new(
            cursor.session_id.clone(),
            cursor.step_seq + 1,
            target.as_str(),
            state,
        );
        self.store.save(&checkpoint, status).await?;
        *cursor = Cursor::from_checkpoint(checkpoint);

        if status != SessionStatus::Active {
            log::info!("Session {} is now {}", cursor.session_id, status);
        }
        Ok(status)
    }

    async fn fail(&self, cursor: &Cursor, node_id: &str, message: String) -> WayfarerError {
        log::error!(
            "Node '{}' failed in session {}: {}",
            node_id,
            cursor.session_id,
            message
        );
        if let Err(e) = self
            .store
            .set_status(&cursor.session_id, SessionStatus::Failed)
            .await
        {
            log::error!("Could not mark session {} failed: {}", cursor.session_id, e);
        }
        WayfarerError::NodeExecution {
            session_id: cursor.session_id.clone(),
            node: node_id.to_string(),
            last_step: cursor.step_seq,
            message,
        }
    }

    async fn cancelled(&self, cursor: &Cursor) -> Result<SessionStatus> {
        log::warn!(
            "Session {} terminated before running '{}'",
            cursor.session_id,
            cursor.next_node
        );
        self.store
            .set_status(&cursor.session_id, SessionStatus::Terminated)
            .await?;
        Ok(SessionStatus::Terminated)
    }
}

/// Run a node body on its own task, so a panic fails the node and not the caller
async fn isolated<T, F>(task: F) -> std::result::Result<T, String>
where
    T: Send + 'static,
    F: Future<Output = std::result::Result<T, String>> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(format!("panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(format!("task aborted: {}", e)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
    }
}

/// Merge branch results in registration order.
///
/// Successful updates fold left to right, so on a colliding key the branch
/// registered last wins. Failed branches, and branches whose update the schema
/// rejects, become `{node, message}` records in the errors field. Returns the
/// merged update and the number of branches that succeeded.
pub fn merge_branch_updates(
    schema: &StateSchema,
    results: Vec<BranchResult>,
) -> (StateUpdate, usize) {
    let mut merged = StateUpdate::new();
    let mut failures = Vec::new();
    let mut succeeded = 0;

    for (node, result) in results {
        let checked = result.and_then(|update| {
            update
                .validate(schema)
                .map(|_| update)
                .map_err(|e| e.to_string())
        });
        match checked {
            Ok(update) => {
                merged.absorb(update, schema);
                succeeded += 1;
            }
            Err(message) => {
                log::warn!("Branch '{}' failed: {}", node, message);
                failures.push(json!({ "node": node, "message": message }));
            }
        }
    }

    if !failures.is_empty() {
        merged.absorb(
            StateUpdate::new().set(ERRORS_FIELD, Value::Array(failures)),
            schema,
        );
    }
    (merged, succeeded)
}
