// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;

/// A named side-effecting action invoked by tool nodes.
///
/// Arguments are gathered from the session state by the engine; the returned
/// summary is written back into the node's result field.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of the action
    fn description(&self) -> &str;

    /// Returns the JSON schema for the argument object
    fn schema(&self) -> &Value;

    /// Perform the action and return a short result summary
    async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>>;
}
