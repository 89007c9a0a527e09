//! Tool registry
//!
//! Registers, looks up, and invokes tools by name. Protected tools cannot be
//! deleted or overwritten. Dispatch strips the model-supplied
//! `tool_description` from arguments, validates the rest against the tool's
//! schema, and bounds execution with a timeout. Handlers return an outcome;
//! they never unwind across the dispatch boundary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::ai::types::AdvertisedTool;
use crate::constants::timeouts;
use crate::error::RuntimeError;
use crate::tools::schema::validate_args;
use crate::tools::workspace::WorkspaceFS;

/// Argument field carrying the model's intent note; stripped before dispatch
/// and surfaced only to logging.
pub const DESCRIPTION_FIELD: &str = "tool_description";

/// Reserved control tool: signals task completion. Intercepted by the loop
/// engine rather than dispatched.
pub const COMPLETE_TASK_TOOL: &str = "complete_task";

/// Reserved control tool: routes into the owning agent's context manager.
pub const MANAGE_CONTEXT_TOOL: &str = "manage_context";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Core,
    Meta,
    Output,
    Custom,
}

/// Result of a tool execution, serializable into a tool_result message.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Structured success payload rendered as JSON text.
    pub fn success_json(value: Value) -> Self {
        Self {
            output: value.to_string(),
            is_error: false,
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: json!({"error": msg.to_string()}).to_string(),
            is_error: true,
        }
    }
}

/// Parse tool parameters, returning a `ToolOutcome` error on failure.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolOutcome> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutcome::error(format!("invalid parameters: {e}")))
}

/// Execution context handed to every tool.
pub struct ToolContext {
    /// Sandboxed filesystem owned by the calling agent.
    pub workspace: Arc<WorkspaceFS>,
    /// Per-call timeout override; the registry default applies otherwise.
    pub timeout: Option<Duration>,
    /// Timeout for sandboxed code execution.
    pub code_timeout: Duration,
}

impl ToolContext {
    pub fn new(workspace: Arc<WorkspaceFS>) -> Self {
        Self {
            workspace,
            timeout: None,
            code_timeout: timeouts::CODE_EXECUTION,
        }
    }

    pub fn with_code_timeout(mut self, timeout: Duration) -> Self {
        self.code_timeout = timeout;
        self
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description advertised to the model
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory {
        ToolCategory::Core
    }

    /// Protected tools cannot be deleted or overwritten.
    fn protected(&self) -> bool {
        false
    }

    /// JSON schema for the argument object
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome;
}

/// Descriptive row for tool listings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub protected: bool,
}

/// Completed dispatch: the outcome plus the stripped description.
#[derive(Debug)]
pub struct Invocation {
    pub outcome: ToolOutcome,
    pub description: Option<String>,
}

/// Remove `tool_description` from an argument object, returning it.
pub fn strip_description(args: &mut Value) -> Option<String> {
    args.as_object_mut()?
        .remove(DESCRIPTION_FIELD)
        .and_then(|v| v.as_str().map(String::from))
}

/// Registry for managing tools.
///
/// Mutation is serialized behind the lock; the loop engine captures a
/// snapshot at the start of each turn so mid-turn registration never races
/// dispatch.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: timeouts::TOOL_EXECUTION,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Overwriting a protected tool is a policy violation.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RuntimeError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap();
        if let Some(existing) = tools.get(&name) {
            if existing.protected() {
                return Err(RuntimeError::ProtectedTool(name));
            }
        }
        debug!(tool = %name, "registered tool");
        tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool. Protected tools cannot be removed.
    pub fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let mut tools = self.tools.write().unwrap();
        match tools.get(name) {
            None => Err(RuntimeError::UnknownTool(name.to_string())),
            Some(tool) if tool.protected() => Err(RuntimeError::ProtectedTool(name.to_string())),
            Some(_) => {
                tools.remove(name);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// List tools, optionally filtered by category.
    pub fn list(&self, category: Option<ToolCategory>) -> Vec<ToolInfo> {
        let tools = self.tools.read().unwrap();
        let mut infos: Vec<ToolInfo> = tools
            .values()
            .filter(|t| category.map_or(true, |c| t.category() == c))
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category(),
                protected: t.protected(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Freeze the current tool set for one loop turn.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            tools: self.tools.read().unwrap().clone(),
            default_timeout: self.default_timeout,
        }
    }

    /// One-off dispatch against the live tool set.
    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Invocation, RuntimeError> {
        self.snapshot().invoke(name, args, ctx).await
    }
}

/// A frozen view of the registry captured at a turn boundary.
pub struct RegistrySnapshot {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl RegistrySnapshot {
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas advertised to the model, with the required `tool_description`
    /// field injected into every tool so the agent explains each call.
    pub fn advertised(&self) -> Vec<AdvertisedTool> {
        let mut advertised: Vec<AdvertisedTool> = self
            .tools
            .values()
            .map(|tool| {
                let mut parameters = tool.parameters_schema();
                inject_description_field(&mut parameters);
                AdvertisedTool {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters,
                }
            })
            .collect();
        advertised.sort_by(|a, b| a.name.cmp(&b.name));
        advertised
    }

    /// Validate and execute a tool call.
    ///
    /// `UnknownTool` and `SchemaViolation` are typed errors; handler failures
    /// and timeouts come back as error outcomes so the model can react.
    pub async fn invoke(
        &self,
        name: &str,
        mut args: Value,
        ctx: &ToolContext,
    ) -> Result<Invocation, RuntimeError> {
        let tool = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownTool(name.to_string()))?;

        let description = strip_description(&mut args);
        validate_args(&tool.parameters_schema(), &args).map_err(|reason| {
            RuntimeError::SchemaViolation {
                tool: name.to_string(),
                reason,
            }
        })?;

        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(timeout, tool.execute(args, ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                ToolOutcome::error(format!("tool '{name}' timed out after {}s", timeout.as_secs()))
            }
        };

        Ok(Invocation {
            outcome,
            description,
        })
    }
}

fn inject_description_field(schema: &mut Value) {
    if !schema.is_object() {
        *schema = json!({"type": "object", "properties": {}});
    }
    let object = schema.as_object_mut().expect("schema forced to object above");
    let properties = object
        .entry("properties")
        .or_insert_with(|| json!({}));
    if let Some(properties) = properties.as_object_mut() {
        properties.entry(DESCRIPTION_FIELD.to_string()).or_insert(json!({
            "type": "string",
            "description": "A brief description of what you are doing with this tool call and why"
        }));
    }
    let required = object.entry("required").or_insert_with(|| json!([]));
    if let Some(required) = required.as_array_mut() {
        if !required.iter().any(|v| v == DESCRIPTION_FIELD) {
            required.push(Value::String(DESCRIPTION_FIELD.to_string()));
        }
    }
}
