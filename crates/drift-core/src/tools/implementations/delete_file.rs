//! Delete a file from the agent workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolOutcome};

pub struct DeleteFileTool;

#[derive(Deserialize)]
struct Params {
    path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file or directory from your workspace"
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path to delete"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.workspace.delete(&params.path) {
            Ok(()) => ToolOutcome::success_json(json!({"deleted": params.path})),
            Err(e) => ToolOutcome::error(e),
        }
    }
}
