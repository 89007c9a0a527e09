//! Sandboxed code execution
//!
//! Runs a Python or shell snippet as a subprocess confined to the agent
//! workspace. The child is killed when the timeout fires or the handle is
//! dropped, so a cancelled agent never leaves strays behind.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

use crate::tools::registry::{parse_params, Tool, ToolContext, ToolOutcome};

const MAX_OUTPUT_BYTES: usize = 100_000;

pub struct RunCodeTool;

#[derive(Deserialize)]
struct Params {
    language: Language,
    code: String,
    /// Optional timeout in seconds; the context default applies otherwise.
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum Language {
    Python,
    Bash,
}

impl Language {
    fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Bash => "sh",
        }
    }

    fn interpreter(self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Bash => "bash",
        }
    }
}

#[async_trait]
impl Tool for RunCodeTool {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Execute Python or bash code inside your workspace. Output is captured; \
         a non-zero exit code is reported as an error."
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": {"type": "string", "enum": ["python", "bash"]},
                "code": {"type": "string", "description": "Code to execute"},
                "timeout": {"type": "integer", "description": "Timeout in seconds"}
            },
            "required": ["language", "code"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<Params>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let script_rel = format!(
            "temp/snippet-{}.{}",
            uuid::Uuid::new_v4().simple(),
            params.language.extension()
        );
        if let Err(e) = ctx.workspace.write(&script_rel, params.code.as_bytes()) {
            return ToolOutcome::error(e);
        }
        let script_path = ctx.workspace.root().join(&script_rel);

        let limit = params
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(ctx.code_timeout);
        info!(language = params.language.interpreter(), timeout_secs = limit.as_secs(), "running code");

        let mut cmd = Command::new(params.language.interpreter());
        cmd.arg(&script_path)
            .current_dir(ctx.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let mut combined = String::new();
                if !output.stdout.is_empty() {
                    combined.push_str("STDOUT:\n");
                    combined.push_str(&String::from_utf8_lossy(&output.stdout));
                }
                if !output.stderr.is_empty() {
                    combined.push_str("STDERR:\n");
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                if combined.len() > MAX_OUTPUT_BYTES {
                    combined.truncate(MAX_OUTPUT_BYTES);
                    combined.push_str("\n[OUTPUT TRUNCATED]");
                }
                combined.push_str(&format!("Exit code: {exit_code}"));

                ToolOutcome {
                    output: combined,
                    is_error: exit_code != 0,
                }
            }
            Ok(Err(e)) => ToolOutcome::error(format!("failed to execute: {e}")),
            // Dropping the future killed the child via kill_on_drop.
            Err(_) => ToolOutcome::error(format!(
                "execution timed out after {}s",
                limit.as_secs()
            )),
        };

        let _ = ctx.workspace.delete(&script_rel);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::workspace::WorkspaceFS;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx() -> (ToolContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let ws = Arc::new(WorkspaceFS::create(dir.path().join("ws")).unwrap());
        (ToolContext::new(ws), dir)
    }

    #[tokio::test]
    async fn bash_stdout_captured() {
        let (ctx, _dir) = ctx();
        let outcome = RunCodeTool
            .execute(json!({"language": "bash", "code": "echo out-$((40+2))"}), &ctx)
            .await;
        assert!(!outcome.is_error);
        assert!(outcome.output.contains("out-42"));
        assert!(outcome.output.contains("Exit code: 0"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error() {
        let (ctx, _dir) = ctx();
        let outcome = RunCodeTool
            .execute(json!({"language": "bash", "code": "exit 3"}), &ctx)
            .await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("Exit code: 3"));
    }

    #[tokio::test]
    async fn runaway_script_killed_on_timeout() {
        let (ctx, _dir) = ctx();
        let outcome = RunCodeTool
            .execute(
                json!({"language": "bash", "code": "sleep 30", "timeout": 1}),
                &ctx,
            )
            .await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("timed out"));
    }

    #[tokio::test]
    async fn script_runs_inside_workspace() {
        let (ctx, _dir) = ctx();
        let outcome = RunCodeTool
            .execute(
                json!({"language": "bash", "code": "echo data > produced.txt"}),
                &ctx,
            )
            .await;
        assert!(!outcome.is_error);
        assert_eq!(ctx.workspace.read("produced.txt").unwrap().trim(), "data");
    }
}
