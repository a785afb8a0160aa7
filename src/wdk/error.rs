// SPDX-License-Identifier: MIT

//! Typed error handling for wayfarer-rs
//!
//! Compile-time graph problems, runtime node and router failures, persistence
//! failures and lifecycle violations each get their own variant so callers can
//! tell them apart without string matching.

use thiserror::Error;

/// Top-level error type for wayfarer-rs
#[derive(Debug, Error)]
pub enum WayfarerError {
    /// The graph failed validation; no session was started
    #[error("Graph definition error: {0}")]
    GraphDefinition(#[from] GraphDefinitionError),

    /// A node executor failed; the session is now failed
    #[error(
        "Node '{node}' failed in session {session_id} (last good step {last_step}): {message}"
    )]
    NodeExecution {
        session_id: String,
        node: String,
        last_step: u64,
        message: String,
    },

    /// A router produced an outcome its edge never declared
    #[error(
        "Router on '{node}' returned undeclared outcome '{outcome}' in session {session_id} (last good step {last_step})"
    )]
    RouterOutcome {
        session_id: String,
        node: String,
        outcome: String,
        last_step: u64,
    },

    /// Checkpoint write or read failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid lifecycle transition or unknown session
    #[error("Session state error: {0}")]
    SessionState(String),

    /// A state update was rejected by the schema
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Tool not registered
    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    /// Configuration errors (invalid values, unreadable file)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Violations found while compiling a graph definition.
///
/// Compilation stops at the first one, so each variant names the node involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphDefinitionError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("No entry node declared")]
    MissingEntry,

    #[error("Exactly one entry node is allowed, found: {0:?}")]
    MultipleEntries(Vec<String>),

    #[error("Node '{from}' references unknown node '{to}'")]
    UnknownNode { from: String, to: String },

    #[error("Node '{0}' has no outgoing edge")]
    MissingEdge(String),

    #[error("Node '{node}' is missing '{field}'")]
    MissingField { node: String, field: String },

    #[error("Node '{node}' must not declare {field}")]
    UnexpectedEdge { node: String, field: String },

    #[error("Router on '{node}' can return '{outcome}' but no target is mapped for it")]
    UnmappedOutcome { node: String, outcome: String },

    #[error("Node '{0}' requires an executor")]
    MissingExecutor(String),

    #[error("Executor '{executor}' for node '{node}' is not registered")]
    UnknownExecutor { node: String, executor: String },

    #[error("Tool '{tool}' for node '{node}' is not registered")]
    UnknownTool { node: String, tool: String },

    #[error("Invalid branch set on '{node}': {reason}")]
    InvalidBranch { node: String, reason: String },

    #[error("Suspend node '{0}' must continue to a regular node")]
    InvalidSuspend(String),

    #[error("Invalid loop bound on '{node}': {reason}")]
    InvalidLoopBound { node: String, reason: String },

    #[error("Node '{0}' is unreachable from the entry node")]
    Unreachable(String),

    #[error("Invalid state schema: {0}")]
    InvalidSchema(String),
}

/// Merge-time violations of the state schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Unknown state field '{0}'")]
    UnknownField(String),

    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
}

impl WayfarerError {
    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a session state error
    pub fn session_state(message: impl Into<String>) -> Self {
        Self::SessionState(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a tool not found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }
}

impl From<sqlx::Error> for WayfarerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WayfarerError>;
