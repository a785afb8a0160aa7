// SPDX-License-Identifier: MIT

//! Session record and lifecycle transition table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Being driven, or ready to be
    Active,
    /// Parked at a suspend node awaiting a human decision
    SuspendedForHuman,
    /// Reached a terminal node
    Completed,
    /// Stopped by a decision or an explicit terminate call
    Terminated,
    /// A node, router or fan-out failed
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::SuspendedForHuman => "suspended_for_human",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a permitted transition.
    ///
    /// `Failed -> Active` exists only for explicit recovery from a checkpoint.
    /// Completed and terminated sessions never move again.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, _) | (SuspendedForHuman, Active | Terminated | Failed) | (Failed, Active)
        )
    }

    /// Statuses `resume` and `step` accept
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            SessionStatus::Active | SessionStatus::SuspendedForHuman
        )
    }

    /// Archived statuses; the session is never driven again unless recovered
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Terminated | SessionStatus::Failed
        )
    }

    /// Only failed sessions can be forced back to an earlier checkpoint
    pub fn can_recover(&self) -> bool {
        matches!(self, SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "suspended_for_human" => Ok(SessionStatus::SuspendedForHuman),
            "completed" => Ok(SessionStatus::Completed),
            "terminated" => Ok(SessionStatus::Terminated),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One run of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub initial_query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the session reaches a finished status
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, initial_query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: SessionStatus::Active,
            initial_query: initial_query.into(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Record a status change at `at`, maintaining the archive timestamp
    pub fn touch(&mut self, status: SessionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        self.finished_at = if status.is_finished() { Some(at) } else { None };
    }
}
