//! Integration tests for graph execution, persistence and session lifecycle
//!
//! These tests drive whole sessions through the public API using in-memory
//! and SQLite checkpoint stores and small purpose-built graphs.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use wayfarer_rs::wayfarer::persistence::{
    Checkpoint, CheckpointStore, LoadedCheckpoint, MemoryCheckpointStore, QueryCache,
    ResumableSession, SqliteCheckpointStore, SqliteQueryCache,
};
use wayfarer_rs::wayfarer::session::{Session, SessionManager, SessionStatus};
use wayfarer_rs::wayfarer::travel::{compile_travel_graph, CostAnalysis, LookupCache};
use wayfarer_rs::wayfarer::workflow::builder::GraphBuilder;
use wayfarer_rs::wayfarer::workflow::graph::{
    CompiledGraph, EngineLimits, RouteDefinition, END,
};
use wayfarer_rs::wayfarer::workflow::loader::WorkflowLoader;
use wayfarer_rs::wayfarer::workflow::registry::ToolRegistry;
use wayfarer_rs::wayfarer::workflow::router::{outcome, Router};
use wayfarer_rs::wayfarer::workflow::state::{
    ControlPatch, FieldType, HumanDecision, StateFieldDef, StateSchema, StateUpdate,
    WorkflowState, ERRORS_FIELD,
};
use wayfarer_rs::wdk::error::{Result, WayfarerError};
use wayfarer_rs::wdk::node::{executor_fn, NodeExecutor, NodeResult};
use wayfarer_rs::wdk::tool::Tool;

// ============================================================================
// Mock Components
// ============================================================================

/// Branch executor that sleeps before answering
struct DelayedBranch {
    name: String,
    delay_ms: u64,
}

#[async_trait]
impl NodeExecutor for DelayedBranch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _state: &WorkflowState) -> NodeResult {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(StateUpdate::new()
            .set("winner", self.name.clone())
            .set("notes", json!([self.name.clone()])))
    }
}

fn delayed(name: &str, delay_ms: u64) -> Arc<dyn NodeExecutor> {
    Arc::new(DelayedBranch {
        name: name.to_string(),
        delay_ms,
    })
}

/// Executor that signals when it starts and waits to be released
struct GateExecutor {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl NodeExecutor for GateExecutor {
    fn name(&self) -> &str {
        "gate"
    }

    async fn execute(&self, _state: &WorkflowState) -> NodeResult {
        self.started.notify_one();
        self.release.notified().await;
        Ok(StateUpdate::new().set("notes", json!(["gate"])))
    }
}

struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    fn executor(&self) -> Arc<dyn NodeExecutor> {
        Arc::new(GateExecutor {
            started: Arc::clone(&self.started),
            release: Arc::clone(&self.release),
        })
    }
}

static COUNTING_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": { "content": { "type": "string" } }
    })
});

/// Tool that counts its invocations
struct CountingTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "record"
    }

    fn description(&self) -> &str {
        "Counts invocations"
    }

    fn schema(&self) -> &Value {
        &COUNTING_SCHEMA
    }

    async fn invoke(&self, args: Value) -> std::result::Result<String, Box<dyn Error + Send + Sync>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("recorded {} (call {})", args["content"], n))
    }
}

/// Memory store whose `save` fails for one chosen step
struct FailingStore {
    inner: MemoryCheckpointStore,
    fail_at: AtomicU64,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            inner: MemoryCheckpointStore::new(),
            fail_at: AtomicU64::new(u64::MAX),
        }
    }

    fn fail_at_step(&self, step: u64) {
        self.fail_at.store(step, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.fail_at.store(u64::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn create_session(&self, session: &Session, initial: &Checkpoint) -> Result<()> {
        self.inner.create_session(session, initial).await
    }

    async fn save(&self, checkpoint: &Checkpoint, status: SessionStatus) -> Result<()> {
        if checkpoint.step_seq == self.fail_at.load(Ordering::SeqCst) {
            return Err(WayfarerError::persistence("disk full"));
        }
        self.inner.save(checkpoint, status).await
    }

    async fn load_latest(&self, session_id: &str) -> Result<LoadedCheckpoint> {
        self.inner.load_latest(session_id).await
    }

    async fn load_at(&self, session_id: &str, step_seq: u64) -> Result<Checkpoint> {
        self.inner.load_at(session_id, step_seq).await
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.inner.set_status(session_id, status).await
    }

    async fn list_resumable(&self) -> Result<Vec<ResumableSession>> {
        self.inner.list_resumable().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn schema() -> StateSchema {
    StateSchema::new()
        .field("query", StateFieldDef::new(FieldType::String))
        .field("winner", StateFieldDef::new(FieldType::String))
        .field("receipt", StateFieldDef::new(FieldType::String))
        .field("notes", StateFieldDef::append())
}

fn note(text: &'static str) -> Arc<dyn NodeExecutor> {
    executor_fn(text, move |_| Ok(StateUpdate::new().set("notes", json!([text]))))
}

fn manager_for(graph: CompiledGraph, store: Arc<dyn CheckpointStore>) -> SessionManager {
    SessionManager::new(Arc::new(graph), store, EngineLimits::default())
}

async fn fan_out_graph(delays: [u64; 3]) -> CompiledGraph {
    GraphBuilder::new("fan_out")
        .state_schema(schema())
        .set_entry("lookups")
        .add_parallel("lookups", &["flights", "hotels", "sights"], None, "join")
        .add_branch("flights", delayed("flights", delays[0]))
        .add_branch("hotels", delayed("hotels", delays[1]))
        .add_branch("sights", delayed("sights", delays[2]))
        .add_join("join", None, "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap()
}

/// Sequential, parallel and a bounded loop that settles on its second pass
async fn mixed_graph() -> CompiledGraph {
    let optimize = executor_fn("optimize", |state: &WorkflowState| {
        let satisfied = state.control().optimization_attempts >= 2;
        Ok(StateUpdate::new()
            .set("notes", json!([format!("pass {}", state.control().optimization_attempts)]))
            .with_control(ControlPatch {
                budget_satisfied: Some(satisfied),
                ..Default::default()
            }))
    });
    let route = RouteDefinition::new(Router::BudgetLoop)
        .outcome(outcome::CONTINUE, "optimize")
        .outcome(outcome::SATISFIED, "finish")
        .outcome(outcome::HUMAN_INTERVENTION, END)
        .bounded(outcome::CONTINUE, outcome::HUMAN_INTERVENTION);

    GraphBuilder::new("mixed")
        .state_schema(schema())
        .set_entry("start")
        .add_sequential("start", note("start"), "lookups")
        .add_parallel("lookups", &["flights", "hotels"], Some(2), "join")
        .add_branch("flights", delayed("flights", 5))
        .add_branch("hotels", delayed("hotels", 1))
        .add_join("join", Some(note("join")), "optimize")
        .add_conditional("optimize", Some(optimize), route)
        .add_sequential("finish", note("finish"), "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap()
}

/// Travel planner on an in-memory database, with lookups cached in the same database
async fn travel_manager(output_dir: &std::path::Path) -> SessionManager {
    travel_manager_with_cache(output_dir).await.0
}

async fn travel_manager_with_cache(
    output_dir: &std::path::Path,
) -> (SessionManager, Arc<dyn QueryCache>) {
    let store = SqliteCheckpointStore::in_memory().await.unwrap();
    let cache: Arc<dyn QueryCache> = Arc::new(SqliteQueryCache::new(store.pool().clone()));
    let lookups = LookupCache::new(Arc::clone(&cache), chrono::Duration::hours(24));
    let graph = compile_travel_graph(
        WorkflowLoader::travel_planner().unwrap(),
        output_dir,
        Some(lookups),
    )
    .await
    .unwrap();
    (manager_for(graph, Arc::new(store)), cache)
}

// ============================================================================
// Loop bound
// ============================================================================

#[tokio::test]
async fn test_always_continue_router_forced_out_after_three_passes() {
    let route = RouteDefinition::new(Router::Constant {
        outcome: outcome::CONTINUE.to_string(),
    })
    .outcome(outcome::CONTINUE, "spin")
    .outcome(outcome::HUMAN_INTERVENTION, "escape")
    .bounded(outcome::CONTINUE, outcome::HUMAN_INTERVENTION);
    let graph = GraphBuilder::new("spin")
        .state_schema(schema())
        .set_entry("spin")
        .add_conditional("spin", None, route)
        .add_sequential("escape", note("escaped"), END)
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = manager_for(graph, store.clone());
    let id = manager.create_session("loop").await.unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);

    // attempts 1, 2, 3 on the continues, then the forced escape leaves it at 3
    let expected = [(1, 1, "spin"), (2, 2, "spin"), (3, 3, "spin"), (4, 3, "escape")];
    for (step, attempts, next) in expected {
        let checkpoint = store.load_at(&id, step).await.unwrap();
        assert_eq!(checkpoint.state.control().optimization_attempts, attempts);
        assert_eq!(checkpoint.next_node_id, next);
    }
    let latest = manager.inspect(&id).await.unwrap();
    assert_eq!(latest.checkpoint.state.get("notes"), Some(&json!(["escaped"])));
}

#[tokio::test]
async fn test_satisfied_at_bound_still_takes_escape() {
    let optimize = executor_fn("optimize", |state: &WorkflowState| {
        let satisfied = state.control().optimization_attempts >= 3;
        Ok(StateUpdate::new().with_control(ControlPatch {
            budget_satisfied: Some(satisfied),
            ..Default::default()
        }))
    });
    let route = RouteDefinition::new(Router::BudgetLoop)
        .outcome(outcome::CONTINUE, "optimize")
        .outcome(outcome::SATISFIED, "finish")
        .outcome(outcome::HUMAN_INTERVENTION, "escape")
        .bounded(outcome::CONTINUE, outcome::HUMAN_INTERVENTION);
    let graph = GraphBuilder::new("late_satisfied")
        .state_schema(schema())
        .set_entry("optimize")
        .add_conditional("optimize", Some(optimize), route)
        .add_sequential("finish", note("finish"), END)
        .add_sequential("escape", note("escaped"), END)
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = manager_for(graph, store.clone());
    let id = manager.create_session("loop").await.unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);

    // the fourth pass reports satisfied but the bound is already reached
    let at_bound = store.load_at(&id, 4).await.unwrap();
    assert!(at_bound.state.control().budget_satisfied);
    assert_eq!(at_bound.next_node_id, "escape");

    let latest = manager.inspect(&id).await.unwrap();
    assert_eq!(latest.checkpoint.step_seq, 5);
    assert_eq!(latest.checkpoint.state.control().optimization_attempts, 3);
    assert_eq!(latest.checkpoint.state.get("notes"), Some(&json!(["escaped"])));
}

// ============================================================================
// Determinism
// ============================================================================

#[tokio::test]
async fn test_resume_after_every_step_matches_uninterrupted_run() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());

    let straight = manager_for(mixed_graph().await, Arc::clone(&store));
    let a = straight.create_session("same query").await.unwrap();
    assert_eq!(straight.run(&a).await.unwrap(), SessionStatus::Completed);

    let b = straight.create_session("same query").await.unwrap();
    let mut status = SessionStatus::Active;
    let mut steps = 0;
    while status == SessionStatus::Active {
        // a fresh manager each time stands in for a process restart
        let restarted = manager_for(mixed_graph().await, Arc::clone(&store));
        status = restarted.step(&b).await.unwrap();
        steps += 1;
    }
    assert_eq!(status, SessionStatus::Completed);

    let first = store.load_latest(&a).await.unwrap().checkpoint;
    let second = store.load_latest(&b).await.unwrap().checkpoint;
    assert_eq!(first.state, second.state);
    assert_eq!(first.step_seq, second.step_seq);
    assert_eq!(steps, second.step_seq);
    assert_eq!(
        second.state.get("notes"),
        Some(&json!([
            "start", "flights", "hotels", "join", "pass 0", "pass 1", "pass 2", "finish"
        ]))
    );
    assert_eq!(second.state.control().optimization_attempts, 2);
}

#[tokio::test]
async fn test_parallel_merge_ignores_completion_order() {
    let mut finals = Vec::new();
    for delays in [[30, 10, 20], [10, 20, 30], [20, 30, 10]] {
        let manager = manager_for(
            fan_out_graph(delays).await,
            Arc::new(MemoryCheckpointStore::new()),
        );
        let id = manager.create_session("trip").await.unwrap();
        assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);
        finals.push(manager.inspect(&id).await.unwrap().checkpoint.state);
    }

    for state in &finals {
        // colliding key: the branch registered last wins
        assert_eq!(state.get_str("winner"), Some("sights"));
        assert_eq!(state.get("notes"), Some(&json!(["flights", "hotels", "sights"])));
        assert_eq!(state, &finals[0]);
    }
}

#[tokio::test]
async fn test_fan_out_is_one_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = manager_for(fan_out_graph([1, 1, 1]).await, store.clone());
    let id = manager.create_session("trip").await.unwrap();

    assert_eq!(manager.step(&id).await.unwrap(), SessionStatus::Active);
    let after = store.load_latest(&id).await.unwrap().checkpoint;
    assert_eq!(after.step_seq, 1);
    assert_eq!(after.next_node_id, "join");
}

// ============================================================================
// Branch failures
// ============================================================================

#[tokio::test]
async fn test_partial_branch_failure_records_error_and_continues() {
    let graph = GraphBuilder::new("partial")
        .state_schema(schema())
        .set_entry("lookups")
        .add_parallel("lookups", &["ok_a", "broken", "ok_b"], None, "join")
        .add_join("join", None, "done")
        .add_branch("ok_a", note("a"))
        .add_branch("broken", executor_fn("broken", |_| Err("provider timeout".into())))
        .add_branch("ok_b", note("b"))
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = manager_for(graph, Arc::new(MemoryCheckpointStore::new()));
    let id = manager.create_session("trip").await.unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);
    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    assert_eq!(state.get("notes"), Some(&json!(["a", "b"])));
    assert_eq!(
        state.get(ERRORS_FIELD),
        Some(&json!([{ "node": "broken", "message": "provider timeout" }]))
    );
}

#[tokio::test]
async fn test_all_branches_failing_fails_session_at_fan_out() {
    let graph = GraphBuilder::new("total")
        .state_schema(schema())
        .set_entry("lookups")
        .add_parallel("lookups", &["x", "y"], None, "join")
        .add_join("join", None, "done")
        .add_branch("x", executor_fn("x", |_| Err("down".into())))
        .add_branch("y", executor_fn("y", |_| Err("down".into())))
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = manager_for(graph, Arc::new(MemoryCheckpointStore::new()));
    let id = manager.create_session("trip").await.unwrap();

    let err = manager.run(&id).await.unwrap_err();
    assert!(matches!(err, WayfarerError::NodeExecution { ref node, .. } if node == "lookups"));

    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.session.status, SessionStatus::Failed);
    assert_eq!(loaded.checkpoint.next_node_id, "lookups");
    let errors = loaded.checkpoint.state.get(ERRORS_FIELD).unwrap().as_array().unwrap();
    assert_eq!(errors.len(), 2);
}

// ============================================================================
// Persistence failures and recovery
// ============================================================================

#[tokio::test]
async fn test_failed_save_reruns_node_on_resume() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let calls = Arc::clone(&calls);
        executor_fn("b", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(StateUpdate::new().set("notes", json!(["b"])))
        })
    };
    let graph = GraphBuilder::new("interrupt")
        .state_schema(schema())
        .set_entry("a")
        .add_sequential("a", note("a"), "b")
        .add_sequential("b", counted, "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let store = Arc::new(FailingStore::new());
    let manager = manager_for(graph, store.clone());
    let id = manager.create_session("trip").await.unwrap();

    store.fail_at_step(2);
    let err = manager.run(&id).await.unwrap_err();
    assert!(matches!(err, WayfarerError::Persistence(_)));

    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.session.status, SessionStatus::Active);
    assert_eq!(loaded.checkpoint.step_seq, 1);
    assert_eq!(loaded.checkpoint.next_node_id, "b");

    store.heal();
    assert_eq!(manager.resume(&id, None).await.unwrap(), SessionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    assert_eq!(state.get("notes"), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn test_recover_failed_session() {
    let broken = Arc::new(AtomicBool::new(true));
    let flaky = {
        let broken = Arc::clone(&broken);
        executor_fn("b", move |_| {
            if broken.load(Ordering::SeqCst) {
                Err("hotel service unavailable".into())
            } else {
                Ok(StateUpdate::new().set("notes", json!(["b"])))
            }
        })
    };
    let graph = GraphBuilder::new("recover")
        .state_schema(schema())
        .set_entry("a")
        .add_sequential("a", note("a"), "b")
        .add_sequential("b", flaky, "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = manager_for(graph, store.clone());
    let id = manager.create_session("trip").await.unwrap();

    let err = manager.run(&id).await.unwrap_err();
    assert!(matches!(err, WayfarerError::NodeExecution { last_step: 1, .. }));
    assert!(manager.resume(&id, None).await.is_err());

    broken.store(false, Ordering::SeqCst);
    assert_eq!(manager.recover(&id, None).await.unwrap(), 2);
    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.session.status, SessionStatus::Active);
    assert_eq!(loaded.checkpoint.next_node_id, "b");

    assert_eq!(manager.resume(&id, None).await.unwrap(), SessionStatus::Completed);
    // earlier checkpoints are untouched
    assert_eq!(store.load_at(&id, 1).await.unwrap().next_node_id, "b");
}

#[tokio::test]
async fn test_recover_from_earlier_step() {
    let graph = GraphBuilder::new("recover_at")
        .state_schema(schema())
        .set_entry("a")
        .add_sequential("a", note("a"), "b")
        .add_sequential("b", executor_fn("b", |_| Err("boom".into())), "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = manager_for(graph, Arc::new(MemoryCheckpointStore::new()));
    let id = manager.create_session("trip").await.unwrap();
    manager.run(&id).await.unwrap_err();

    let step = manager.recover(&id, Some(0)).await.unwrap();
    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.checkpoint.step_seq, step);
    assert_eq!(loaded.checkpoint.next_node_id, "a");
    assert_eq!(loaded.checkpoint.state.get("notes"), Some(&json!([])));
}

// ============================================================================
// Tools
// ============================================================================

#[tokio::test]
async fn test_completed_tool_is_not_invoked_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tools = ToolRegistry::new();
    tools
        .register(Arc::new(CountingTool {
            calls: Arc::clone(&calls),
        }))
        .await;
    let graph = GraphBuilder::new("tool")
        .state_schema(schema())
        .set_entry("record")
        .add_tool("record", "record", &[("content", "query")], "receipt", "done")
        .add_terminal("done")
        .compile(&tools)
        .await
        .unwrap();
    let store = Arc::new(MemoryCheckpointStore::new());
    let manager = manager_for(graph, store.clone());

    // fresh session: the tool runs once and is marked complete
    let fresh = manager.create_session("first").await.unwrap();
    assert_eq!(manager.run(&fresh).await.unwrap(), SessionStatus::Completed);
    let state = manager.inspect(&fresh).await.unwrap().checkpoint.state;
    assert!(state.control().is_tool_complete("record"));
    assert_eq!(state.get_str("receipt"), Some("recorded \"first\" (call 1)"));

    // a checkpoint that already carries the completion mark skips the side effect
    let id = manager.create_session("second").await.unwrap();
    let latest = store.load_latest(&id).await.unwrap().checkpoint;
    let mut state = latest.state.clone();
    state.control_mut().completed_tools.insert("record".to_string());
    store
        .save(&latest.successor("record", state), SessionStatus::Active)
        .await
        .unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    assert!(state.get("receipt").is_none());
}

// ============================================================================
// Concurrency and cancellation
// ============================================================================

#[tokio::test]
async fn test_second_driver_is_rejected() {
    let gate = Gate::new();
    let graph = GraphBuilder::new("gated")
        .state_schema(schema())
        .set_entry("wait")
        .add_sequential("wait", gate.executor(), "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = Arc::new(manager_for(graph, Arc::new(MemoryCheckpointStore::new())));
    let id = manager.create_session("trip").await.unwrap();

    let driver = {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.run(&id).await })
    };
    gate.started.notified().await;

    assert!(matches!(manager.step(&id).await, Err(WayfarerError::SessionState(_))));
    assert!(matches!(manager.resume(&id, None).await, Err(WayfarerError::SessionState(_))));

    gate.release.notify_one();
    assert_eq!(driver.await.unwrap().unwrap(), SessionStatus::Completed);
}

#[tokio::test]
async fn test_terminate_while_running_stops_at_next_boundary() {
    let gate = Gate::new();
    let graph = GraphBuilder::new("gated")
        .state_schema(schema())
        .set_entry("wait")
        .add_sequential("wait", gate.executor(), "after")
        .add_sequential("after", note("after"), "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = Arc::new(manager_for(graph, Arc::new(MemoryCheckpointStore::new())));
    let id = manager.create_session("trip").await.unwrap();

    let driver = {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.run(&id).await })
    };
    gate.started.notified().await;
    manager.terminate(&id).await.unwrap();
    gate.release.notify_one();

    assert_eq!(driver.await.unwrap().unwrap(), SessionStatus::Terminated);
    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.session.status, SessionStatus::Terminated);
    // the in-flight node finished and was saved; the next one never ran
    assert_eq!(loaded.checkpoint.step_seq, 1);
    assert_eq!(loaded.checkpoint.state.get("notes"), Some(&json!(["gate"])));
}

#[tokio::test]
async fn test_terminate_during_step_takes_effect() {
    let gate = Gate::new();
    let graph = GraphBuilder::new("gated")
        .state_schema(schema())
        .set_entry("wait")
        .add_sequential("wait", gate.executor(), "after")
        .add_sequential("after", note("after"), "done")
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = Arc::new(manager_for(graph, Arc::new(MemoryCheckpointStore::new())));
    let id = manager.create_session("trip").await.unwrap();

    let stepper = {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.step(&id).await })
    };
    gate.started.notified().await;
    manager.terminate(&id).await.unwrap();
    gate.release.notify_one();

    assert_eq!(stepper.await.unwrap().unwrap(), SessionStatus::Terminated);
    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.session.status, SessionStatus::Terminated);
    assert_eq!(loaded.checkpoint.step_seq, 1);
    assert!(matches!(manager.step(&id).await, Err(WayfarerError::SessionState(_))));
}

#[tokio::test]
async fn test_terminate_during_fan_out_discards_branches() {
    let gate = Gate::new();
    let graph = GraphBuilder::new("gated_fan_out")
        .state_schema(schema())
        .set_entry("lookups")
        .add_parallel("lookups", &["slow", "fast"], None, "join")
        .add_join("join", None, "done")
        .add_branch("slow", gate.executor())
        .add_branch("fast", note("fast"))
        .add_terminal("done")
        .compile(&ToolRegistry::new())
        .await
        .unwrap();
    let manager = Arc::new(manager_for(graph, Arc::new(MemoryCheckpointStore::new())));
    let id = manager.create_session("trip").await.unwrap();

    let driver = {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        tokio::spawn(async move { manager.run(&id).await })
    };
    gate.started.notified().await;
    manager.terminate(&id).await.unwrap();

    assert_eq!(driver.await.unwrap().unwrap(), SessionStatus::Terminated);
    let loaded = manager.inspect(&id).await.unwrap();
    assert_eq!(loaded.checkpoint.step_seq, 0);
    assert_eq!(loaded.checkpoint.state.get("notes"), Some(&json!([])));
}

#[tokio::test]
async fn test_independent_sessions_run_concurrently() {
    let store = SqliteCheckpointStore::in_memory().await.unwrap();
    let manager = Arc::new(manager_for(mixed_graph().await, Arc::new(store)));

    let mut ids = Vec::new();
    for n in 0..8 {
        ids.push(manager.create_session(&format!("trip {}", n)).await.unwrap());
    }
    let runs = ids.iter().map(|id| {
        let manager = Arc::clone(&manager);
        let id = id.clone();
        async move { manager.run(&id).await }
    });
    for status in futures::future::join_all(runs).await {
        assert_eq!(status.unwrap(), SessionStatus::Completed);
    }

    for (n, id) in ids.iter().enumerate() {
        let loaded = manager.inspect(id).await.unwrap();
        let expected = format!("trip {}", n);
        assert_eq!(loaded.checkpoint.state.get_str("query"), Some(expected.as_str()));
        assert!(loaded.session.finished_at.is_some());
    }
    assert!(manager.list_resumable().await.unwrap().is_empty());
}

// ============================================================================
// Travel planner end to end
// ============================================================================

#[tokio::test]
async fn test_travel_plan_within_reach_completes_and_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager
        .create_session("5 days in yunnan, budget 5000")
        .await
        .unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);

    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    assert!(state.control().budget_satisfied);
    assert_eq!(state.control().optimization_attempts, 0);
    // the first itinerary pass scores 0.75, the second clears the target
    assert_eq!(state.control().attempts("itinerary"), 1);
    assert_eq!(state.get_path("itinerary_review.score"), Some(&json!(0.9)));
    assert_eq!(state.get_path("documents.scope"), Some(&json!("domestic")));
    assert_eq!(state.get_path("travel_window.season"), Some(&json!("unknown")));
    assert!(state
        .get_str("itinerary_file")
        .unwrap()
        .starts_with("Itinerary saved to"));
    let written = std::fs::read_to_string(dir.path().join("yunnan_5d_itinerary.txt")).unwrap();
    assert!(written.contains("Lijiang Old Town"));
}

#[tokio::test]
async fn test_travel_plan_suspends_only_at_review() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager
        .create_session("10 day luxury trip to paris budget 3000")
        .await
        .unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::SuspendedForHuman);
    let parked = manager.inspect(&id).await.unwrap();
    assert_eq!(parked.checkpoint.next_node_id, "apply_decision");
    // parse, four checks, fan-out, join, one optimization pass, review
    assert_eq!(parked.checkpoint.step_seq, 9);
    assert!(parked.checkpoint.state.control().needs_human_intervention);

    let listed = manager.list_resumable().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SessionStatus::SuspendedForHuman);

    assert_eq!(
        manager.resume(&id, Some(HumanDecision::Accept)).await.unwrap(),
        SessionStatus::Completed
    );
    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    let analysis: CostAnalysis =
        serde_json::from_value(state.get("cost_analysis").unwrap().clone()).unwrap();
    assert!(analysis.adjusted);
    assert!(dir.path().join("europe_10d_itinerary.txt").exists());
}

#[tokio::test]
async fn test_oversized_trip_request_runs_to_review() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager
        .create_session("trip to yunnan for 9000000 days budget 5000")
        .await
        .unwrap();

    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::SuspendedForHuman);
    let state = manager.inspect(&id).await.unwrap().checkpoint.state;
    assert_eq!(state.get_path("travel_info.days"), Some(&json!(60)));
}

#[tokio::test]
async fn test_repeated_request_reuses_cached_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, cache) = travel_manager_with_cache(dir.path()).await;

    let first = manager.create_session("4 days in sanya budget 9000").await.unwrap();
    assert_eq!(manager.run(&first).await.unwrap(), SessionStatus::Completed);
    let stats = cache.stats().await.unwrap();
    assert_eq!((stats.total, stats.hits), (3, 0));

    let second = manager.create_session("4 days in sanya budget 9000").await.unwrap();
    assert_eq!(manager.run(&second).await.unwrap(), SessionStatus::Completed);
    let stats = cache.stats().await.unwrap();
    assert_eq!((stats.total, stats.hits, stats.active), (3, 3, 3));

    let a = manager.inspect(&first).await.unwrap().checkpoint.state;
    let b = manager.inspect(&second).await.unwrap().checkpoint.state;
    assert_eq!(a.get("cost_analysis"), b.get("cost_analysis"));
}

#[tokio::test]
async fn test_terminate_decision_never_generates_itinerary() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager
        .create_session("10 day luxury trip to paris budget 3000")
        .await
        .unwrap();
    manager.run(&id).await.unwrap();

    assert_eq!(
        manager.resume(&id, Some(HumanDecision::Terminate)).await.unwrap(),
        SessionStatus::Terminated
    );
    let loaded = manager.inspect(&id).await.unwrap();
    assert!(loaded.checkpoint.state.get("itinerary").is_none());
    assert_eq!(loaded.checkpoint.next_node_id, "__terminate__");
    assert!(loaded.session.finished_at.is_some());

    let err = manager.resume(&id, None).await.unwrap_err();
    assert!(matches!(err, WayfarerError::SessionState(_)));
}

#[tokio::test]
async fn test_terminate_suspended_travel_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager
        .create_session("10 day luxury trip to paris budget 3000")
        .await
        .unwrap();
    manager.run(&id).await.unwrap();

    manager.terminate(&id).await.unwrap();
    assert_eq!(
        manager.inspect(&id).await.unwrap().session.status,
        SessionStatus::Terminated
    );
    assert!(manager
        .resume(&id, Some(HumanDecision::Accept))
        .await
        .is_err());
}

#[tokio::test]
async fn test_completed_session_cannot_resume() {
    let dir = tempfile::tempdir().unwrap();
    let manager = travel_manager(dir.path()).await;
    let id = manager.create_session("3 days in beijing budget 9000").await.unwrap();
    assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::Completed);

    assert!(matches!(
        manager.resume(&id, None).await,
        Err(WayfarerError::SessionState(_))
    ));
    assert!(manager.terminate(&id).await.is_err());
}

#[tokio::test]
async fn test_suspended_session_survives_reopening_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("checkpoints.db").display());
    let output = dir.path().join("out");

    let id = {
        let graph = compile_travel_graph(WorkflowLoader::travel_planner().unwrap(), &output, None)
            .await
            .unwrap();
        let store = SqliteCheckpointStore::connect(&url).await.unwrap();
        let manager = manager_for(graph, Arc::new(store));
        let id = manager
            .create_session("10 day luxury trip to paris budget 3000")
            .await
            .unwrap();
        assert_eq!(manager.run(&id).await.unwrap(), SessionStatus::SuspendedForHuman);
        id
    };

    let graph = compile_travel_graph(WorkflowLoader::travel_planner().unwrap(), &output, None)
        .await
        .unwrap();
    let store = SqliteCheckpointStore::connect(&url).await.unwrap();
    let manager = manager_for(graph, Arc::new(store));

    let listed = manager.list_resumable().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, id);

    assert_eq!(
        manager.resume(&id, Some(HumanDecision::Keep)).await.unwrap(),
        SessionStatus::Completed
    );
    assert!(output.join("europe_10d_itinerary.txt").exists());
}
