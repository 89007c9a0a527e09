//! Read a file from the agent workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolOutcome};

pub struct ReadFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in your workspace"
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path to the file"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.workspace.read(&params.path) {
            Ok(content) => ToolOutcome::success(content),
            Err(e) => ToolOutcome::error(e),
        }
    }
}
