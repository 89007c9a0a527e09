//! Dynamic custom tools
//!
//! The agent can extend its own tool set at runtime: `create_tool` persists a
//! declared schema plus a Python implementation under `tools/custom/` in the
//! workspace and registers it; `delete_tool` removes it. Protected tools can
//! never be overwritten or deleted this way. Custom tools survive restarts by
//! being reloaded from the workspace at startup.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::RuntimeError;
use crate::tools::registry::{
    parse_params, Tool, ToolCategory, ToolContext, ToolOutcome, ToolRegistry,
};
use crate::tools::workspace::WorkspaceFS;

const CUSTOM_TOOLS_DIR: &str = "tools/custom";

/// Persisted declaration of a custom tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool whose handler is a Python script in the agent workspace.
///
/// The script receives the argument object as JSON on argv[1] and its stdout
/// becomes the tool result.
pub struct CustomScriptTool {
    spec: CustomToolSpec,
    script_rel: String,
}

impl CustomScriptTool {
    pub fn new(spec: CustomToolSpec) -> Self {
        let script_rel = format!("{CUSTOM_TOOLS_DIR}/{}.py", spec.name);
        Self { spec, script_rel }
    }
}

#[async_trait]
impl Tool for CustomScriptTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Custom
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let script_path = ctx.workspace.root().join(&self.script_rel);
        if !script_path.exists() {
            return ToolOutcome::error(format!(
                "implementation missing for custom tool '{}'",
                self.spec.name
            ));
        }

        let mut cmd = tokio::process::Command::new("python3");
        cmd.arg(&script_path)
            .arg(params.to_string())
            .current_dir(ctx.workspace.root())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let limit = ctx.timeout.unwrap_or(ctx.code_timeout);
        match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                if output.status.success() {
                    ToolOutcome::success(stdout)
                } else {
                    ToolOutcome::error(format!(
                        "custom tool exited with {}: {}",
                        output.status.code().unwrap_or(-1),
                        String::from_utf8_lossy(&output.stderr)
                    ))
                }
            }
            Ok(Err(e)) => ToolOutcome::error(format!("failed to execute: {e}")),
            Err(_) => ToolOutcome::error(format!(
                "custom tool timed out after {}s",
                limit.as_secs()
            )),
        }
    }
}

/// Meta tool: declare and register a new custom tool.
///
/// Holds the registry weakly; tools never keep their registry alive.
pub struct CreateToolTool {
    registry: Weak<ToolRegistry>,
}

impl CreateToolTool {
    pub fn new(registry: &Arc<ToolRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[derive(Deserialize)]
struct CreateParams {
    name: String,
    description: String,
    parameters_schema: Value,
    /// Python source; the argument object arrives as JSON on argv[1].
    implementation: String,
}

#[async_trait]
impl Tool for CreateToolTool {
    fn name(&self) -> &str {
        "create_tool"
    }

    fn description(&self) -> &str {
        "Create a new custom tool from a Python implementation. The tool becomes \
         available on your next turn. Arguments arrive as a JSON object in sys.argv[1]; \
         print the result to stdout."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Meta
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Tool name, lowercase with underscores"},
                "description": {"type": "string"},
                "parameters_schema": {"type": "object", "description": "JSON schema for the arguments"},
                "implementation": {"type": "string", "description": "Python source code"}
            },
            "required": ["name", "description", "parameters_schema", "implementation"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<CreateParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let spec = CustomToolSpec {
            name: params.name.clone(),
            description: params.description,
            parameters: params.parameters_schema,
        };
        let spec_json = match serde_json::to_string_pretty(&spec) {
            Ok(json) => json,
            Err(e) => return ToolOutcome::error(e),
        };

        if let Err(e) = ctx.workspace.write(
            &format!("{CUSTOM_TOOLS_DIR}/{}.json", spec.name),
            spec_json.as_bytes(),
        ) {
            return ToolOutcome::error(e);
        }
        if let Err(e) = ctx.workspace.write(
            &format!("{CUSTOM_TOOLS_DIR}/{}.py", spec.name),
            params.implementation.as_bytes(),
        ) {
            return ToolOutcome::error(e);
        }

        let Some(registry) = self.registry.upgrade() else {
            return ToolOutcome::error("tool registry is gone");
        };
        match registry.register(Arc::new(CustomScriptTool::new(spec))) {
            Ok(()) => {
                info!(tool = %params.name, "custom tool created");
                ToolOutcome::success_json(json!({
                    "success": true,
                    "message": format!("tool '{}' created", params.name),
                }))
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}

/// Meta tool: delete a custom tool. Protected tools are refused.
pub struct DeleteToolTool {
    registry: Weak<ToolRegistry>,
}

impl DeleteToolTool {
    pub fn new(registry: &Arc<ToolRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

#[derive(Deserialize)]
struct DeleteParams {
    name: String,
    #[serde(default)]
    confirm: bool,
}

#[async_trait]
impl Tool for DeleteToolTool {
    fn name(&self) -> &str {
        "delete_tool"
    }

    fn description(&self) -> &str {
        "Delete a custom tool you created earlier. Requires confirm=true."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Meta
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "confirm": {"type": "boolean"}
            },
            "required": ["name", "confirm"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<DeleteParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !params.confirm {
            return ToolOutcome::error("deletion must be confirmed");
        }

        let Some(registry) = self.registry.upgrade() else {
            return ToolOutcome::error("tool registry is gone");
        };
        match registry.remove(&params.name) {
            Ok(()) => {
                let _ = ctx
                    .workspace
                    .delete(&format!("{CUSTOM_TOOLS_DIR}/{}.json", params.name));
                let _ = ctx
                    .workspace
                    .delete(&format!("{CUSTOM_TOOLS_DIR}/{}.py", params.name));
                ToolOutcome::success_json(json!({
                    "success": true,
                    "message": format!("tool '{}' deleted", params.name),
                }))
            }
            Err(e) => ToolOutcome::error(e),
        }
    }
}

/// Reload persisted custom tools from the workspace at startup.
pub fn load_custom_tools(
    registry: &ToolRegistry,
    workspace: &WorkspaceFS,
) -> Result<usize, RuntimeError> {
    if !workspace.exists(CUSTOM_TOOLS_DIR)? {
        return Ok(0);
    }

    let mut loaded = 0;
    for entry in workspace.list(CUSTOM_TOOLS_DIR, false)? {
        if !entry.path.ends_with(".json") {
            continue;
        }
        let raw = workspace.read(&entry.path)?;
        let spec: CustomToolSpec = match serde_json::from_str(&raw) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(file = %entry.path, error = %e, "skipping unreadable custom tool spec");
                continue;
            }
        };
        registry.register(Arc::new(CustomScriptTool::new(spec)))?;
        loaded += 1;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Arc<ToolRegistry>, ToolContext, TempDir) {
        let dir = TempDir::new().unwrap();
        let ws = Arc::new(WorkspaceFS::create(dir.path().join("ws")).unwrap());
        let registry = Arc::new(ToolRegistry::new());
        (registry.clone(), ToolContext::new(ws), dir)
    }

    fn create_args(name: &str) -> Value {
        json!({
            "name": name,
            "description": "adds two numbers",
            "parameters_schema": {
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            },
            "implementation": "import json, sys\nargs = json.loads(sys.argv[1])\nprint(args['a'] + args['b'])"
        })
    }

    #[tokio::test]
    async fn create_registers_and_persists() {
        let (registry, ctx, _dir) = setup();
        let create = CreateToolTool::new(&registry);

        let outcome = create.execute(create_args("adder"), &ctx).await;
        assert!(!outcome.is_error, "{}", outcome.output);
        assert!(registry.contains("adder"));
        assert!(ctx.workspace.exists("tools/custom/adder.json").unwrap());
        assert!(ctx.workspace.exists("tools/custom/adder.py").unwrap());
    }

    #[tokio::test]
    async fn created_tool_cannot_shadow_protected() {
        let (registry, ctx, _dir) = setup();
        registry
            .register(Arc::new(crate::tools::implementations::ReadFileTool))
            .unwrap();
        let create = CreateToolTool::new(&registry);

        let outcome = create.execute(create_args("read_file"), &ctx).await;
        assert!(outcome.is_error);
        assert!(outcome.output.contains("protected"));
    }

    #[tokio::test]
    async fn delete_requires_confirm_and_spares_protected() {
        let (registry, ctx, _dir) = setup();
        registry
            .register(Arc::new(crate::tools::implementations::ReadFileTool))
            .unwrap();
        let create = CreateToolTool::new(&registry);
        create.execute(create_args("adder"), &ctx).await;
        let delete = DeleteToolTool::new(&registry);

        let unconfirmed = delete
            .execute(json!({"name": "adder", "confirm": false}), &ctx)
            .await;
        assert!(unconfirmed.is_error);
        assert!(registry.contains("adder"));

        let protected = delete
            .execute(json!({"name": "read_file", "confirm": true}), &ctx)
            .await;
        assert!(protected.is_error);
        assert!(registry.contains("read_file"));

        let confirmed = delete
            .execute(json!({"name": "adder", "confirm": true}), &ctx)
            .await;
        assert!(!confirmed.is_error);
        assert!(!registry.contains("adder"));
        assert!(!ctx.workspace.exists("tools/custom/adder.py").unwrap());
    }

    #[tokio::test]
    async fn custom_tools_reload_from_workspace() {
        let (registry, ctx, _dir) = setup();
        let create = CreateToolTool::new(&registry);
        create.execute(create_args("adder"), &ctx).await;

        let fresh = ToolRegistry::new();
        let loaded = load_custom_tools(&fresh, &ctx.workspace).unwrap();
        assert_eq!(loaded, 1);
        assert!(fresh.contains("adder"));
    }
}
