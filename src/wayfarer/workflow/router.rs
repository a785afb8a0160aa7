// SPDX-License-Identifier: MIT

//! Routers for conditional nodes
//!
//! The router set is closed: each variant knows its outcome keys, so the
//! compiler can check that every outcome has a target before any session runs.

use crate::wayfarer::workflow::state::{HumanDecision, WorkflowState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome keys produced by the built-in routers
pub mod outcome {
    pub const SATISFIED: &str = "satisfied";
    pub const HUMAN_INTERVENTION: &str = "human_intervention";
    pub const CONTINUE: &str = "continue";
    pub const ACCEPT: &str = "accept";
    pub const KEEP: &str = "keep";
    pub const TERMINATE: &str = "terminate";
    pub const NONE: &str = "none";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Router {
    /// Always the same outcome
    Constant { outcome: String },
    /// The string value of a state path; the outcome set is whatever the edge maps
    FieldValue { field: String },
    /// Budget optimization loop: satisfied, human_intervention or continue
    BudgetLoop,
    /// Quality loop: satisfied once the number at `field` reaches `threshold`,
    /// continue otherwise (including when the field is missing)
    ScoreLoop { field: String, threshold: f64 },
    /// The human decision recorded at the suspension point
    HumanDecision,
}

impl Router {
    pub fn route(&self, state: &WorkflowState) -> String {
        match self {
            Router::Constant { outcome } => outcome.clone(),
            Router::FieldValue { field } => match state.get_path(field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => outcome::NONE.to_string(),
                Some(other) => other.to_string(),
            },
            Router::BudgetLoop => {
                let control = state.control();
                if control.budget_satisfied {
                    outcome::SATISFIED.to_string()
                } else if control.needs_human_intervention {
                    outcome::HUMAN_INTERVENTION.to_string()
                } else {
                    outcome::CONTINUE.to_string()
                }
            }
            Router::ScoreLoop { field, threshold } => {
                match state.get_path(field).and_then(Value::as_f64) {
                    Some(score) if score >= *threshold => outcome::SATISFIED.to_string(),
                    _ => outcome::CONTINUE.to_string(),
                }
            }
            Router::HumanDecision => match state.control().human_decision {
                HumanDecision::None => outcome::NONE.to_string(),
                decision => decision.as_str().to_string(),
            },
        }
    }

    /// Outcomes this router can produce, or `None` when the set is open.
    ///
    /// `none` from the human decision router is deliberately absent: routing
    /// without a decision is an engine error, not a graph edge.
    pub fn declared_outcomes(&self) -> Option<Vec<String>> {
        let keys: Vec<&str> = match self {
            Router::Constant { outcome } => return Some(vec![outcome.clone()]),
            Router::FieldValue { .. } => return None,
            Router::BudgetLoop => vec![
                outcome::SATISFIED,
                outcome::HUMAN_INTERVENTION,
                outcome::CONTINUE,
            ],
            Router::ScoreLoop { .. } => vec![outcome::SATISFIED, outcome::CONTINUE],
            Router::HumanDecision => vec![outcome::ACCEPT, outcome::KEEP, outcome::TERMINATE],
        };
        Some(keys.into_iter().map(str::to_string).collect())
    }
}
