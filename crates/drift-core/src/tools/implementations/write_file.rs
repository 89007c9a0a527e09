//! Write a file into the agent workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolOutcome};

/// Maximum content size to write (10 MB)
const MAX_WRITE_SIZE: usize = 10 * 1024 * 1024;

pub struct WriteFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
    #[serde(default)]
    mode: WriteMode,
}

#[derive(Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in your workspace, creating parent directories as needed. \
         Use mode 'append' to add to an existing file instead of replacing it."
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path to the file"},
                "content": {"type": "string", "description": "Content to write"},
                "mode": {"type": "string", "enum": ["overwrite", "append"]}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if params.content.len() > MAX_WRITE_SIZE {
            return ToolOutcome::error(format!(
                "content too large: {} bytes (max {} MB)",
                params.content.len(),
                MAX_WRITE_SIZE / (1024 * 1024)
            ));
        }

        let result = match params.mode {
            WriteMode::Overwrite => ctx.workspace.write(&params.path, params.content.as_bytes()),
            WriteMode::Append => ctx.workspace.append(&params.path, &params.content),
        };

        match result {
            Ok(()) => {
                info!(path = %params.path, bytes = params.content.len(), "wrote workspace file");
                ToolOutcome::success_json(json!({
                    "path": params.path,
                    "bytes_written": params.content.len(),
                }))
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}
