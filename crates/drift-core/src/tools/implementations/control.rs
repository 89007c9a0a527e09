//! Reserved control tools
//!
//! `complete_task` and `manage_context` are advertised like any other tool
//! but intercepted by the loop engine before dispatch: completion must stop
//! the reply's remaining calls, and the context manager has a single writer.
//! The handlers below only answer direct registry invocations.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolOutcome};

pub struct CompleteTaskTool;

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Signal that you have completed your task. Call this when your work is done; \
         it ends your execution for this task."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Output
    }

    fn protected(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why the task is complete: finished, stuck, blocked, or error"
                },
                "summary": {
                    "type": "string",
                    "description": "Brief summary of what was accomplished"
                },
                "output": {
                    "type": "object",
                    "description": "Optional structured output data to return"
                }
            },
            "required": ["reason", "summary"]
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolOutcome {
        ToolOutcome::success_json(json!({
            "message": "task marked as complete; execution ends after this turn"
        }))
    }
}

pub struct ManageContextTool;

#[async_trait]
impl Tool for ManageContextTool {
    fn name(&self) -> &str {
        "manage_context"
    }

    fn description(&self) -> &str {
        "Manage your context window: compact_now (summarize and free space), \
         set_threshold (adjust the auto-compaction trigger), or get_status (check usage)"
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
                "action": {
                    "type": "string",
                    "enum": ["compact_now", "set_threshold", "get_status"]
                },
                "threshold": {
                    "type": "number",
                    "description": "New auto-compaction threshold (only for set_threshold)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolOutcome {
        // Reached only when invoked outside an agent loop.
        ToolOutcome::error("manage_context is handled by the owning agent")
    }
}
