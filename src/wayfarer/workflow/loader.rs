// SPDX-License-Identifier: MIT

//! Workflow loader - YAML file loading and parsing

use super::graph::types::GraphDefinition;
use crate::wdk::error::Result;
use std::fs;
use std::path::Path;

/// The travel planner graph shipped with the crate
pub const TRAVEL_PLANNER_YAML: &str = include_str!("../../../workflows/travel_planner.yaml");

/// Loads graph definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a graph definition from a YAML file
    pub fn load_graph<P: AsRef<Path>>(&self, path: P) -> Result<GraphDefinition> {
        let path = path.as_ref();
        log::info!("Loading graph definition from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a graph definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<GraphDefinition> {
        let def: GraphDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }

    /// The bundled travel planner definition
    pub fn travel_planner() -> Result<GraphDefinition> {
        Self::parse_yaml(TRAVEL_PLANNER_YAML)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
