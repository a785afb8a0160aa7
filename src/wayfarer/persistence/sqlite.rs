// SPDX-License-Identifier: MIT

//! SQLite-backed checkpoint store

use super::checkpoint::{
    check_transition, out_of_sequence, unknown_session, Checkpoint, CheckpointStore,
    LoadedCheckpoint, ResumableSession,
};
use super::pool::DatabasePool;
use crate::wayfarer::session::model::{Session, SessionStatus};
use crate::wayfarer::workflow::state::WorkflowState;
use crate::wdk::error::{Result, WayfarerError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self {
            pool: DatabasePool::connect(database_url).await?,
        })
    }

    /// Private in-memory database, for tests and throwaway runs
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(super) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| WayfarerError::persistence(format!("bad timestamp '{}': {}", raw, e)))
}

fn to_db_seq(step_seq: u64) -> Result<i64> {
    i64::try_from(step_seq)
        .map_err(|_| WayfarerError::persistence(format!("step {} out of range", step_seq)))
}

fn from_db_seq(raw: i64) -> Result<u64> {
    u64::try_from(raw)
        .map_err(|_| WayfarerError::persistence(format!("negative step {} in database", raw)))
}

fn parse_status(raw: &str) -> Result<SessionStatus> {
    raw.parse().map_err(WayfarerError::Persistence)
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let finished_at: Option<String> = row.try_get("finished_at")?;
    Ok(Session {
        id: row.try_get("id")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        initial_query: row.try_get("initial_query")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        finished_at: finished_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn checkpoint_from_row(row: &SqliteRow, session_col: &str, time_col: &str) -> Result<Checkpoint> {
    let state: WorkflowState = serde_json::from_str(&row.try_get::<String, _>("state")?)?;
    Ok(Checkpoint {
        session_id: row.try_get(session_col)?,
        step_seq: from_db_seq(row.try_get("step_seq")?)?,
        next_node_id: row.try_get("next_node_id")?,
        state,
        timestamp: parse_ts(&row.try_get::<String, _>(time_col)?)?,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn create_session(&self, session: &Session, initial: &Checkpoint) -> Result<()> {
        let state = serde_json::to_string(&initial.state)?;
        let mut tx = self.pool.writer.begin().await?;

        sqlx::query(
            "INSERT INTO session (id, status, initial_query, created_at, updated_at, finished_at)
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(&session.id)
        .bind(session.status.as_str())
        .bind(&session.initial_query)
        .bind(format_ts(&session.created_at))
        .bind(format_ts(&session.updated_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO checkpoint (session_id, step_seq, next_node_id, state, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&initial.session_id)
        .bind(to_db_seq(initial.step_seq)?)
        .bind(&initial.next_node_id)
        .bind(state)
        .bind(format_ts(&initial.timestamp))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, checkpoint: &Checkpoint, status: SessionStatus) -> Result<()> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let mut tx = self.pool.writer.begin().await?;

        let (current, max): (String, Option<i64>) = sqlx::query_as(
            "SELECT status, (SELECT MAX(step_seq) FROM checkpoint WHERE session_id = ?)
             FROM session WHERE id = ?",
        )
        .bind(&checkpoint.session_id)
        .bind(&checkpoint.session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| unknown_session(&checkpoint.session_id))?;

        let expected = match max {
            Some(max) => from_db_seq(max)? + 1,
            None => 0,
        };
        if checkpoint.step_seq != expected {
            return Err(out_of_sequence(
                &checkpoint.session_id,
                expected,
                checkpoint.step_seq,
            ));
        }
        check_transition(&checkpoint.session_id, parse_status(&current)?, status)?;

        sqlx::query(
            "INSERT INTO checkpoint (session_id, step_seq, next_node_id, state, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.session_id)
        .bind(to_db_seq(checkpoint.step_seq)?)
        .bind(&checkpoint.next_node_id)
        .bind(state)
        .bind(format_ts(&checkpoint.timestamp))
        .execute(&mut *tx)
        .await?;

        let now = format_ts(&Utc::now());
        let finished_at = status.is_finished().then(|| now.clone());
        sqlx::query("UPDATE session SET status = ?, updated_at = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(finished_at)
            .bind(&checkpoint.session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        log::debug!(
            "Saved checkpoint {} for session {} ({})",
            checkpoint.step_seq,
            checkpoint.session_id,
            status
        );
        Ok(())
    }

    async fn load_latest(&self, session_id: &str) -> Result<LoadedCheckpoint> {
        let row = sqlx::query(
            "SELECT s.id, s.status, s.initial_query, s.created_at, s.updated_at, s.finished_at,
                    c.session_id, c.step_seq, c.next_node_id, c.state, c.created_at AS checkpoint_at
             FROM session s
             JOIN checkpoint c ON c.session_id = s.id
             WHERE s.id = ?
             ORDER BY c.step_seq DESC
             LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool.reader)
        .await?
        .ok_or_else(|| unknown_session(session_id))?;

        Ok(LoadedCheckpoint {
            session: session_from_row(&row)?,
            checkpoint: checkpoint_from_row(&row, "session_id", "checkpoint_at")?,
        })
    }

    async fn load_at(&self, session_id: &str, step_seq: u64) -> Result<Checkpoint> {
        let row = sqlx::query(
            "SELECT session_id, step_seq, next_node_id, state, created_at
             FROM checkpoint WHERE session_id = ? AND step_seq = ?",
        )
        .bind(session_id)
        .bind(to_db_seq(step_seq)?)
        .fetch_optional(&self.pool.reader)
        .await?
        .ok_or_else(|| {
            WayfarerError::session_state(format!(
                "session {} has no checkpoint at step {}",
                session_id, step_seq
            ))
        })?;

        checkpoint_from_row(&row, "session_id", "created_at")
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let mut tx = self.pool.writer.begin().await?;
        let (current,): (String,) = sqlx::query_as("SELECT status FROM session WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| unknown_session(session_id))?;
        check_transition(session_id, parse_status(&current)?, status)?;

        let now = format_ts(&Utc::now());
        let finished_at = status.is_finished().then(|| now.clone());
        sqlx::query("UPDATE session SET status = ?, updated_at = ?, finished_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(finished_at)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_resumable(&self) -> Result<Vec<ResumableSession>> {
        let rows = sqlx::query(
            "SELECT s.id, s.status, s.initial_query, s.created_at, s.updated_at, s.finished_at,
                    c.session_id, c.step_seq, c.next_node_id, c.state, c.created_at AS checkpoint_at
             FROM session s
             JOIN checkpoint c ON c.session_id = s.id
             WHERE s.status IN ('active', 'suspended_for_human')
               AND c.step_seq = (SELECT MAX(step_seq) FROM checkpoint WHERE session_id = s.id)
             ORDER BY s.updated_at DESC, s.id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await?;

        rows.iter()
            .map(|row| {
                let session = session_from_row(row)?;
                let checkpoint = checkpoint_from_row(row, "session_id", "checkpoint_at")?;
                Ok(ResumableSession::from_parts(&session, &checkpoint))
            })
            .collect()
    }
}
