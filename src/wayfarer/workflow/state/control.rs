// SPDX-License-Identifier: MIT

//! Control block: the flow-control bookkeeping carried next to the state fields

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Counter name of the budget optimization loop, stored as `optimizationAttempts`
pub const OPTIMIZATION_COUNTER: &str = "optimization";

/// Decision supplied by a human at the suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    #[default]
    None,
    /// Accept an adjusted plan
    Accept,
    /// Keep the current plan as is
    Keep,
    /// Abandon the session
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown decision '{0}', expected accept, keep or terminate")]
pub struct ParseDecisionError(pub String);

impl HumanDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            HumanDecision::None => "none",
            HumanDecision::Accept => "accept",
            HumanDecision::Keep => "keep",
            HumanDecision::Terminate => "terminate",
        }
    }
}

impl fmt::Display for HumanDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HumanDecision {
    type Err = ParseDecisionError;

    /// Accepts the names and the menu numbers shown at the review prompt.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" | "1" => Ok(HumanDecision::Accept),
            "keep" | "reject" | "2" => Ok(HumanDecision::Keep),
            "terminate" | "3" => Ok(HumanDecision::Terminate),
            other => Err(ParseDecisionError(other.to_string())),
        }
    }
}

/// Flow-control sub-structure of the workflow state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBlock {
    #[serde(default)]
    pub budget_satisfied: bool,
    #[serde(default)]
    pub needs_human_intervention: bool,
    /// Budget loop traversals so far. Only the engine increments this.
    #[serde(default)]
    pub optimization_attempts: u32,
    /// Traversals of every other bounded loop, by counter name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub human_decision: HumanDecision,
    /// Tool nodes whose side effect has been durably recorded
    #[serde(default)]
    pub completed_tools: BTreeSet<String>,
}

/// Control changes requested by a node. Unset keys leave the block untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_satisfied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_human_intervention: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_decision: Option<HumanDecision>,
}

impl ControlBlock {
    /// Merge a patch key by key, last write wins
    pub fn apply(&mut self, patch: &ControlPatch) {
        if let Some(satisfied) = patch.budget_satisfied {
            self.budget_satisfied = satisfied;
        }
        if let Some(needs_human) = patch.needs_human_intervention {
            self.needs_human_intervention = needs_human;
        }
        if let Some(decision) = patch.human_decision {
            self.human_decision = decision;
        }
    }

    /// Traversals recorded on the loop counter `counter`
    pub fn attempts(&self, counter: &str) -> u32 {
        if counter == OPTIMIZATION_COUNTER {
            self.optimization_attempts
        } else {
            self.loop_attempts.get(counter).copied().unwrap_or(0)
        }
    }

    pub(crate) fn record_attempt(&mut self, counter: &str) {
        if counter == OPTIMIZATION_COUNTER {
            self.optimization_attempts += 1;
        } else {
            *self.loop_attempts.entry(counter.to_string()).or_insert(0) += 1;
        }
    }

    pub fn is_tool_complete(&self, node_id: &str) -> bool {
        self.completed_tools.contains(node_id)
    }
}

impl ControlPatch {
    pub fn is_empty(&self) -> bool {
        self.budget_satisfied.is_none()
            && self.needs_human_intervention.is_none()
            && self.human_decision.is_none()
    }

    /// Fold a later patch into this one, key by key
    pub fn absorb(&mut self, later: ControlPatch) {
        if later.budget_satisfied.is_some() {
            self.budget_satisfied = later.budget_satisfied;
        }
        if later.needs_human_intervention.is_some() {
            self.needs_human_intervention = later.needs_human_intervention;
        }
        if later.human_decision.is_some() {
            self.human_decision = later.human_decision;
        }
    }
}
