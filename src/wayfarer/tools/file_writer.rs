// SPDX-License-Identifier: MIT

use crate::wdk::tool::Tool;
use async_trait::async_trait;
use chrono::Local;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};

// --- Static schema ---

static WRITE_FILE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Itinerary text to write"
            },
            "name": {
                "type": "string",
                "description": "File name inside the output directory; .txt is added when missing"
            }
        },
        "required": ["content"]
    })
});

const RULE: &str = "============================================================";

#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    pub content: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Writes itineraries as text files under a fixed output directory
pub struct FileWriterTool {
    output_dir: PathBuf,
}

impl FileWriterTool {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Validate a caller-supplied name and add the `.txt` extension
fn file_name(name: Option<&str>) -> Result<String, Box<dyn Error + Send + Sync>> {
    let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("itinerary_{}", Local::now().format("%Y%m%d_%H%M%S")),
    };
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(format!("invalid file name '{}'", name).into());
    }
    if name.ends_with(".txt") {
        Ok(name)
    } else {
        Ok(format!("{}.txt", name))
    }
}

fn render(content: &str) -> String {
    format!(
        "{rule}\nTravel Itinerary\nGenerated: {at}\n{rule}\n\n{content}\n\n{rule}\nRe-run the planner to revise this itinerary.\n{rule}\n",
        rule = RULE,
        at = Local::now().format("%Y-%m-%d %H:%M:%S"),
        content = content
    )
}

#[async_trait]
impl Tool for FileWriterTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Saves an itinerary to a text file in the output directory and reports the path."
    }

    fn schema(&self) -> &Value {
        &WRITE_FILE_SCHEMA
    }

    async fn invoke(&self, args: Value) -> Result<String, Box<dyn Error + Send + Sync>> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let name = file_name(args.name.as_deref())?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(name);
        tokio::fs::write(&path, render(&args.content)).await?;

        log::info!("Wrote itinerary to {}", path.display());
        Ok(format!("Itinerary saved to {}", path.display()))
    }
}
