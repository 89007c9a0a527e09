//! List files in the agent workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolOutcome};

pub struct ListFilesTool;

#[derive(Deserialize)]
struct Params {
    #[serde(default = "default_path")]
    path: String,
    #[serde(default)]
    recursive: bool,
}

fn default_path() -> String {
    ".".to_string()
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in your workspace, optionally recursing into subdirectories"
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative directory, defaults to the root"},
                "recursive": {"type": "boolean"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.workspace.list(&params.path, params.recursive) {
            Ok(entries) => ToolOutcome::success_json(json!({ "files": entries })),
            Err(e) => ToolOutcome::error(e),
        }
    }
}
