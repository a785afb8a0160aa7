// SPDX-License-Identifier: MIT

//! In-memory checkpoint store
//!
//! Each session gets its own mutex, so saves for one session serialize while
//! other sessions proceed untouched. The outer map lock is only held to find
//! or insert a session.

use super::checkpoint::{
    check_transition, out_of_sequence, unknown_session, Checkpoint, CheckpointStore,
    LoadedCheckpoint, ResumableSession,
};
use crate::wayfarer::session::model::{Session, SessionStatus};
use crate::wdk::error::{Result, WayfarerError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

struct SessionLog {
    session: Session,
    checkpoints: Vec<Checkpoint>,
}

impl SessionLog {
    fn latest(&self) -> Result<&Checkpoint> {
        self.checkpoints.last().ok_or_else(|| {
            WayfarerError::persistence(format!(
                "session {} has no checkpoints",
                self.session.id
            ))
        })
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionLog>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, session_id: &str) -> Result<Arc<Mutex<SessionLog>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| unknown_session(session_id))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create_session(&self, session: &Session, initial: &Checkpoint) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(WayfarerError::persistence(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(
            session.id.clone(),
            Arc::new(Mutex::new(SessionLog {
                session: session.clone(),
                checkpoints: vec![initial.clone()],
            })),
        );
        Ok(())
    }

    async fn save(&self, checkpoint: &Checkpoint, status: SessionStatus) -> Result<()> {
        let log = self.log(&checkpoint.session_id).await?;
        let mut log = log.lock().await;

        let expected = log.latest()?.step_seq + 1;
        if checkpoint.step_seq != expected {
            return Err(out_of_sequence(
                &checkpoint.session_id,
                expected,
                checkpoint.step_seq,
            ));
        }
        check_transition(&checkpoint.session_id, log.session.status, status)?;

        log.checkpoints.push(checkpoint.clone());
        log.session.touch(status, Utc::now());
        log::debug!(
            "Saved checkpoint {} for session {} ({})",
            checkpoint.step_seq,
            checkpoint.session_id,
            status
        );
        Ok(())
    }

    async fn load_latest(&self, session_id: &str) -> Result<LoadedCheckpoint> {
        let log = self.log(session_id).await?;
        let log = log.lock().await;
        Ok(LoadedCheckpoint {
            checkpoint: log.latest()?.clone(),
            session: log.session.clone(),
        })
    }

    async fn load_at(&self, session_id: &str, step_seq: u64) -> Result<Checkpoint> {
        let log = self.log(session_id).await?;
        let log = log.lock().await;
        log.checkpoints
            .iter()
            .find(|c| c.step_seq == step_seq)
            .cloned()
            .ok_or_else(|| {
                WayfarerError::session_state(format!(
                    "session {} has no checkpoint at step {}",
                    session_id, step_seq
                ))
            })
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let log = self.log(session_id).await?;
        let mut log = log.lock().await;
        check_transition(session_id, log.session.status, status)?;
        log.session.touch(status, Utc::now());
        Ok(())
    }

    async fn list_resumable(&self) -> Result<Vec<ResumableSession>> {
        let logs: Vec<Arc<Mutex<SessionLog>>> =
            self.sessions.read().await.values().cloned().collect();

        let mut out = Vec::new();
        for log in logs {
            let log = log.lock().await;
            if log.session.status.is_resumable() {
                out.push(ResumableSession::from_parts(&log.session, log.latest()?));
            }
        }
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(out)
    }
}
