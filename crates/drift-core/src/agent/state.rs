//! Agent lifecycle state and completion records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::prompt_queue::QueuedPrompt;
use crate::agent::status_bus::StatusSnapshot;

/// Lifecycle state machine of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Idle => "idle",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Paused => "paused",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task-scoped agent terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Finished,
    Stuck,
    Blocked,
    Error,
    MaxTurnsExceeded,
}

impl CompletionReason {
    /// Map the free-text `reason` argument of `complete_task` onto the
    /// terminal set. Unrecognized values read as finished.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stuck" => CompletionReason::Stuck,
            "blocked" | "need_input" | "needs_input" => CompletionReason::Blocked,
            "error" | "failed" => CompletionReason::Error,
            "max_turns" | "max_turns_exceeded" => CompletionReason::MaxTurnsExceeded,
            _ => CompletionReason::Finished,
        }
    }
}

/// The output of `complete_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub reason: CompletionReason,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl CompletionRecord {
    pub fn new(reason: CompletionReason, summary: impl Into<String>) -> Self {
        Self {
            reason,
            summary: summary.into(),
            output: None,
        }
    }

    /// Build from validated `complete_task` arguments.
    pub fn from_args(args: &Value) -> Self {
        Self {
            reason: CompletionReason::parse(args.get("reason").and_then(|r| r.as_str()).unwrap_or("")),
            summary: args
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            output: args.get("output").cloned().filter(|v| !v.is_null()),
        }
    }
}

/// Mutable execution state owned by the loop engine.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub phase: LifecyclePhase,
    pub loop_count: u64,
    pub total_tokens: u64,
    pub last_action: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            phase: LifecyclePhase::Idle,
            loop_count: 0,
            total_tokens: 0,
            last_action: None,
            started_at: None,
            last_error: None,
        }
    }
}

impl AgentState {
    /// Build a status snapshot for publication.
    pub fn snapshot(
        &self,
        context_usage_percent: f64,
        queued_prompts: Vec<QueuedPrompt>,
        todos_digest: Option<String>,
    ) -> StatusSnapshot {
        StatusSnapshot {
            status: self.phase.to_string(),
            loop_count: self.loop_count,
            total_tokens: self.total_tokens,
            last_action: self.last_action.clone(),
            context_usage_percent,
            queued_prompts,
            todos_digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_parsing_maps_synonyms() {
        assert_eq!(CompletionReason::parse("finished"), CompletionReason::Finished);
        assert_eq!(CompletionReason::parse("success"), CompletionReason::Finished);
        assert_eq!(CompletionReason::parse("need_input"), CompletionReason::Blocked);
        assert_eq!(CompletionReason::parse("ERROR"), CompletionReason::Error);
        assert_eq!(CompletionReason::parse("anything else"), CompletionReason::Finished);
    }

    #[test]
    fn record_from_args() {
        let record = CompletionRecord::from_args(&json!({
            "reason": "blocked",
            "summary": "waiting on credentials",
            "output": {"asked": true}
        }));
        assert_eq!(record.reason, CompletionReason::Blocked);
        assert_eq!(record.summary, "waiting on credentials");
        assert_eq!(record.output.unwrap()["asked"], true);
    }

    #[test]
    fn null_output_dropped() {
        let record = CompletionRecord::from_args(&json!({
            "reason": "finished",
            "summary": "done",
            "output": null
        }));
        assert!(record.output.is_none());
    }

    #[test]
    fn phase_strings_are_lowercase() {
        assert_eq!(LifecyclePhase::Running.to_string(), "running");
        assert_eq!(LifecyclePhase::Error.to_string(), "error");
    }
}
