// SPDX-License-Identifier: MIT

//! Session lifecycle front door
//!
//! Creates sessions, resumes them with or without a human decision, terminates
//! and recovers them. At most one driver runs a given session at a time; a
//! second caller is turned away instead of queued.

use crate::wayfarer::persistence::{
    Checkpoint, CheckpointStore, LoadedCheckpoint, ResumableSession,
};
use crate::wayfarer::session::model::{Session, SessionStatus};
use crate::wayfarer::workflow::graph::{
    CompiledGraph, EngineLimits, WorkflowEngine, END, TERMINATE,
};
use crate::wayfarer::workflow::state::HumanDecision;
use crate::wdk::error::{Result, WayfarerError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type RunningMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Exclusive right to drive one session; released on drop
struct DriveLease {
    session_id: String,
    token: CancellationToken,
    running: RunningMap,
}

impl DriveLease {
    fn acquire(running: &RunningMap, session_id: &str) -> Result<Self> {
        let mut map = running.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(session_id) {
            return Err(WayfarerError::session_state(format!(
                "session {} is already being driven",
                session_id
            )));
        }
        let token = CancellationToken::new();
        map.insert(session_id.to_string(), token.clone());
        Ok(Self {
            session_id: session_id.to_string(),
            token,
            running: Arc::clone(running),
        })
    }
}

impl Drop for DriveLease {
    fn drop(&mut self) {
        let mut map = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(&self.session_id);
    }
}

/// Owns the engine and the store for one compiled graph
pub struct SessionManager {
    engine: WorkflowEngine,
    store: Arc<dyn CheckpointStore>,
    running: RunningMap,
}

impl SessionManager {
    pub fn new(
        graph: Arc<CompiledGraph>,
        store: Arc<dyn CheckpointStore>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            engine: WorkflowEngine::new(graph, Arc::clone(&store), limits),
            store,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Start a session: step 0 holds the initial state and points at the entry node
    pub async fn create_session(&self, query: &str) -> Result<String> {
        let graph = self.engine.graph();
        let session_id = Uuid::new_v4().to_string();
        let state = graph.initial_state(query)?;
        let session = Session::new(session_id.clone(), query);
        let initial = Checkpoint::new(session_id.clone(), 0, graph.entry(), state);

        self.store.create_session(&session, &initial).await?;
        log::info!(
            "Created session {} on graph '{}' at '{}'",
            session_id,
            graph.name(),
            graph.entry()
        );
        Ok(session_id)
    }

    /// Execute exactly one node
    pub async fn step(&self, session_id: &str) -> Result<SessionStatus> {
        let lease = DriveLease::acquire(&self.running, session_id)?;
        self.engine.step(session_id, &lease.token).await
    }

    /// Drive an active session until it stops being active
    pub async fn run(&self, session_id: &str) -> Result<SessionStatus> {
        let lease = DriveLease::acquire(&self.running, session_id)?;
        self.engine.run(session_id, &lease.token).await
    }

    /// Continue a session from its latest checkpoint.
    ///
    /// A suspended session needs a decision; an active one must not get one.
    pub async fn resume(
        &self,
        session_id: &str,
        decision: Option<HumanDecision>,
    ) -> Result<SessionStatus> {
        let lease = DriveLease::acquire(&self.running, session_id)?;
        let status = self.store.load_latest(session_id).await?.session.status;

        match (status, decision) {
            (SessionStatus::SuspendedForHuman, Some(decision))
                if decision != HumanDecision::None =>
            {
                self.engine.apply_decision(session_id, decision).await?;
            }
            (SessionStatus::SuspendedForHuman, _) => {
                return Err(WayfarerError::session_state(format!(
                    "session {} is waiting for a decision (accept, keep or terminate)",
                    session_id
                )));
            }
            (SessionStatus::Active, None) => {}
            (SessionStatus::Active, Some(decision)) => {
                return Err(WayfarerError::session_state(format!(
                    "session {} is not waiting for a decision, got '{}'",
                    session_id, decision
                )));
            }
            (other, _) => {
                return Err(WayfarerError::session_state(format!(
                    "session {} is {} and cannot be resumed",
                    session_id, other
                )));
            }
        }

        log::info!("Resuming session {}", session_id);
        self.engine.run(session_id, &lease.token).await
    }

    /// Stop a session.
    ///
    /// A running driver is cancelled and stops at its next step boundary.
    /// Otherwise an active or suspended session is marked terminated at once.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        let running = {
            let map = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            map.get(session_id).cloned()
        };
        if let Some(token) = running {
            log::info!("Cancelling running session {}", session_id);
            token.cancel();
            return Ok(());
        }

        let _lease = DriveLease::acquire(&self.running, session_id)?;
        let status = self.store.load_latest(session_id).await?.session.status;
        if !status.can_transition_to(SessionStatus::Terminated) {
            return Err(WayfarerError::session_state(format!(
                "session {} is {} and cannot be terminated",
                session_id, status
            )));
        }
        self.store
            .set_status(session_id, SessionStatus::Terminated)
            .await?;
        log::info!("Terminated session {}", session_id);
        Ok(())
    }

    pub async fn list_resumable(&self) -> Result<Vec<ResumableSession>> {
        self.store.list_resumable().await
    }

    /// Latest checkpoint and session record
    pub async fn inspect(&self, session_id: &str) -> Result<LoadedCheckpoint> {
        self.store.load_latest(session_id).await
    }

    /// Restart a failed session from one of its checkpoints.
    ///
    /// The chosen checkpoint (the latest when `step` is `None`) is copied
    /// forward as a new checkpoint and the session becomes active; history is
    /// never rewritten. Returns the new step number.
    pub async fn recover(&self, session_id: &str, step: Option<u64>) -> Result<u64> {
        let _lease = DriveLease::acquire(&self.running, session_id)?;
        let latest = self.store.load_latest(session_id).await?;
        if !latest.session.status.can_recover() {
            return Err(WayfarerError::session_state(format!(
                "session {} is {}; only failed sessions can be recovered",
                session_id, latest.session.status
            )));
        }

        let source = match step {
            Some(step) if step != latest.checkpoint.step_seq => {
                self.store.load_at(session_id, step).await?
            }
            _ => latest.checkpoint.clone(),
        };
        if source.next_node_id == END || source.next_node_id == TERMINATE {
            return Err(WayfarerError::session_state(format!(
                "checkpoint {} of session {} has no node left to run",
                source.step_seq, session_id
            )));
        }

        let copy = latest
            .checkpoint
            .successor(source.next_node_id.clone(), source.state.clone());
        self.store.save(&copy, SessionStatus::Active).await?;
        log::warn!(
            "Recovered session {} from step {} as step {}, next '{}'",
            session_id,
            source.step_seq,
            copy.step_seq,
            copy.next_node_id
        );
        Ok(copy.step_seq)
    }
}
