// SPDX-License-Identifier: MIT

//! Checkpoint records and the store contract

use crate::wayfarer::session::model::{Session, SessionStatus};
use crate::wayfarer::workflow::state::WorkflowState;
use crate::wdk::error::{Result, WayfarerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted snapshot: the state plus the node to run next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub session_id: String,
    pub step_seq: u64,
    pub next_node_id: String,
    pub state: WorkflowState,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        session_id: impl Into<String>,
        step_seq: u64,
        next_node_id: impl Into<String>,
        state: WorkflowState,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            step_seq,
            next_node_id: next_node_id.into(),
            state,
            timestamp: Utc::now(),
        }
    }

    /// The checkpoint that follows this one
    pub fn successor(&self, next_node_id: impl Into<String>, state: WorkflowState) -> Self {
        Self::new(
            self.session_id.clone(),
            self.step_seq + 1,
            next_node_id,
            state,
        )
    }
}

/// Latest checkpoint together with the session record, read as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub session: Session,
}

/// Row of the resumable-session listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumableSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub initial_query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub step_seq: u64,
    pub next_node_id: String,
    pub digest: String,
}

impl ResumableSession {
    pub(crate) fn from_parts(session: &Session, checkpoint: &Checkpoint) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            initial_query: session.initial_query.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            step_seq: checkpoint.step_seq,
            next_node_id: checkpoint.next_node_id.clone(),
            digest: checkpoint.state.digest(),
        }
    }
}

/// Durable checkpoint log plus session status.
///
/// Implementations must make `save` atomic: the new checkpoint and the status
/// change land together or not at all. Writes for one session are
/// serialized; different sessions never wait on each other in the store.
/// Every status change, through `save` or `set_status`, is checked against
/// [`SessionStatus::can_transition_to`] and rejected with a session state
/// error when the table forbids it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Register a new session with its step-0 checkpoint
    async fn create_session(&self, session: &Session, initial: &Checkpoint) -> Result<()>;

    /// Append `checkpoint` and set the session status in one transaction.
    ///
    /// `checkpoint.step_seq` must be exactly one above the current highest.
    async fn save(&self, checkpoint: &Checkpoint, status: SessionStatus) -> Result<()>;

    /// Highest-step checkpoint and the current session record
    async fn load_latest(&self, session_id: &str) -> Result<LoadedCheckpoint>;

    /// A specific earlier checkpoint
    async fn load_at(&self, session_id: &str, step_seq: u64) -> Result<Checkpoint>;

    /// Change the status without writing a checkpoint
    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;

    /// Active and suspended sessions, most recently updated first
    async fn list_resumable(&self) -> Result<Vec<ResumableSession>>;
}

pub(crate) fn unknown_session(session_id: &str) -> WayfarerError {
    WayfarerError::session_state(format!("session {} does not exist", session_id))
}

pub(crate) fn out_of_sequence(session_id: &str, expected: u64, got: u64) -> WayfarerError {
    WayfarerError::persistence(format!(
        "checkpoint for session {} out of sequence: expected step {}, got {}",
        session_id, expected, got
    ))
}

/// Reject a status change the lifecycle table does not allow
pub(crate) fn check_transition(
    session_id: &str,
    from: SessionStatus,
    to: SessionStatus,
) -> Result<()> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    Err(WayfarerError::session_state(format!(
        "session {} cannot move from {} to {}",
        session_id, from, to
    )))
}
