// SPDX-License-Identifier: MIT

//! Travel-planning domain: price tables, cached lookups and the node executors

pub mod lookup;
pub mod nodes;
pub mod pricing;

pub use lookup::LookupCache;
pub use nodes::{register_travel_nodes, travel_nodes, CostAnalysis, TravelInfo};

use crate::wayfarer::tools::FileWriterTool;
use crate::wayfarer::workflow::builder::GraphBuilder;
use crate::wayfarer::workflow::graph::{CompiledGraph, GraphDefinition};
use crate::wayfarer::workflow::registry::{NodeRegistry, ToolRegistry};
use crate::wdk::error::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Compile `def` against the travel executors and a file tool writing into
/// `output_dir`. Lookups go through `cache` when one is given.
pub async fn compile_travel_graph(
    def: GraphDefinition,
    output_dir: impl Into<PathBuf>,
    cache: Option<LookupCache>,
) -> Result<CompiledGraph> {
    let nodes = NodeRegistry::new();
    register_travel_nodes(&nodes, cache.as_ref()).await;

    let tools = ToolRegistry::new();
    tools
        .register(Arc::new(FileWriterTool::new(output_dir)))
        .await;

    let graph = GraphBuilder::from_definition(def, &nodes)
        .await?
        .compile(&tools)
        .await?;
    Ok(graph)
}
