//! Tournament-specific tools
//!
//! `reveal` is registered only on worker registries and publishes workspace
//! files to the stage. `run_tournament` and `call_subagent` are registered on
//! the main agent and drive the engine.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::agent::cancellation::AgentCancellation;
use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext, ToolOutcome};
use crate::tournament::engine::TournamentEngine;
use crate::tournament::types::RevealedFile;

/// Shared reveal sink of one worker; the engine reads it at stage boundaries.
pub type RevealSink = Arc<Mutex<Vec<RevealedFile>>>;

/// Publish a workspace file for downstream stages and debate peers.
pub struct RevealTool {
    worker_id: String,
    shadow_dir: PathBuf,
    sink: RevealSink,
}

impl RevealTool {
    pub fn new(worker_id: impl Into<String>, shadow_dir: PathBuf, sink: RevealSink) -> Self {
        Self {
            worker_id: worker_id.into(),
            shadow_dir,
            sink,
        }
    }
}

#[derive(Deserialize)]
struct RevealParams {
    filename: String,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Tool for RevealTool {
    fn name(&self) -> &str {
        "reveal"
    }

    fn description(&self) -> &str {
        "Reveal a file from your workspace so later stages and debate peers can see it. \
         Revealing the same filename again replaces the earlier entry."
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
                "filename": {"type": "string", "description": "Workspace-relative file to reveal"},
                "description": {"type": "string", "description": "What this file contributes"}
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<RevealParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let content = match ctx.workspace.read(&params.filename) {
            Ok(content) => content,
            Err(e) => return ToolOutcome::error(e),
        };

        // Shadow copy for audit, mirroring the workspace-relative path.
        let shadow_path = self.shadow_dir.join(&params.filename);
        if let Some(parent) = shadow_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutcome::error(e);
            }
        }
        if let Err(e) = std::fs::write(&shadow_path, &content) {
            return ToolOutcome::error(e);
        }

        let entry = RevealedFile {
            filename: params.filename.clone(),
            description: params.description.clone(),
            content,
            worker_id: self.worker_id.clone(),
            revealed_at: Utc::now(),
        };
        {
            let mut sink = self.sink.lock().unwrap();
            // Re-revealing a filename replaces the prior entry.
            sink.retain(|r| r.filename != params.filename);
            sink.push(entry);
        }

        info!(worker = %self.worker_id, filename = %params.filename, "revealed file");
        ToolOutcome::success_json(json!({
            "revealed": params.filename,
            "description": params.description,
        }))
    }
}

/// Run a staged tournament and return its final artifacts.
pub struct RunTournamentTool {
    engine: Arc<TournamentEngine>,
    cancellation: AgentCancellation,
}

impl RunTournamentTool {
    pub fn new(engine: Arc<TournamentEngine>, cancellation: AgentCancellation) -> Self {
        Self {
            engine,
            cancellation,
        }
    }
}

#[derive(Deserialize)]
struct RunTournamentParams {
    topic: String,
    #[serde(default)]
    stages: Option<Vec<usize>>,
    #[serde(default)]
    debate_rounds: Option<u32>,
}

#[async_trait]
impl Tool for RunTournamentTool {
    fn name(&self) -> &str {
        "run_tournament"
    }

    fn description(&self) -> &str {
        "Run a multi-stage tournament of parallel worker agents on a topic. Workers \
         develop independent approaches, critique each other in debate rounds, and a \
         narrowing funnel of stages synthesizes their revealed files into a final set."
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
                "topic": {"type": "string", "description": "The task for the workers"},
                "stages": {
                    "type": "array",
                    "items": {"type": "integer"},
                    "description": "Workers per stage, non-increasing, e.g. [4, 3, 2]"
                },
                "debate_rounds": {"type": "integer", "description": "Peer-critique rounds per stage"}
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<RunTournamentParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let id = match self
            .engine
            .create(&params.topic, params.stages, params.debate_rounds)
        {
            Ok(id) => id,
            Err(e) => return ToolOutcome::error(e),
        };

        match self.engine.run(&id, &self.cancellation).await {
            Ok(tournament) => ToolOutcome::success_json(json!({
                "tournament_id": tournament.id,
                "status": tournament.status,
                "final_artifacts": tournament
                    .final_artifacts
                    .iter()
                    .map(|f| json!({
                        "filename": f.filename,
                        "description": f.description,
                        "content": f.content,
                    }))
                    .collect::<Vec<_>>(),
            })),
            Err(e) => ToolOutcome::error(e),
        }
    }
}

/// Run a single isolated worker on a task.
pub struct CallSubagentTool {
    engine: Arc<TournamentEngine>,
    cancellation: AgentCancellation,
}

impl CallSubagentTool {
    pub fn new(engine: Arc<TournamentEngine>, cancellation: AgentCancellation) -> Self {
        Self {
            engine,
            cancellation,
        }
    }
}

#[derive(Deserialize)]
struct CallSubagentParams {
    task: String,
    #[serde(default)]
    max_turns: Option<u32>,
}

#[async_trait]
impl Tool for CallSubagentTool {
    fn name(&self) -> &str {
        "call_subagent"
    }

    fn description(&self) -> &str {
        "Delegate a task to a single isolated worker agent. The worker runs in its own \
         workspace until it calls complete_task, and its revealed files are returned."
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
                "task": {"type": "string", "description": "The task for the worker"},
                "max_turns": {"type": "integer", "description": "Turn cap override"}
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> ToolOutcome {
        let params = match parse_params::<CallSubagentParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        match self
            .engine
            .call_subagent(&params.task, params.max_turns, &self.cancellation)
            .await
        {
            Ok(result) => ToolOutcome::success_json(json!({
                "success": !result.failed,
                "worker_id": result.worker_id,
                "completion": result.completion,
                "revealed": result
                    .revealed
                    .iter()
                    .map(|f| json!({
                        "filename": f.filename,
                        "description": f.description,
                        "content": f.content,
                    }))
                    .collect::<Vec<_>>(),
            })),
            Err(e) => ToolOutcome::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::workspace::WorkspaceFS;
    use tempfile::TempDir;

    fn reveal_fixture() -> (RevealTool, ToolContext, RevealSink, TempDir) {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(WorkspaceFS::create(dir.path().join("ws")).unwrap());
        let sink: RevealSink = Arc::new(Mutex::new(Vec::new()));
        let tool = RevealTool::new("worker_a", dir.path().join("revealed"), sink.clone());
        (tool, ToolContext::new(workspace), sink, dir)
    }

    #[tokio::test]
    async fn reveal_publishes_and_shadow_copies() {
        let (tool, ctx, sink, dir) = reveal_fixture();
        ctx.workspace.write("idea.md", b"the idea").unwrap();

        let outcome = tool
            .execute(json!({"filename": "idea.md", "description": "my idea"}), &ctx)
            .await;

        assert!(!outcome.is_error);
        let revealed = sink.lock().unwrap();
        assert_eq!(revealed.len(), 1);
        assert_eq!(revealed[0].content, "the idea");
        assert_eq!(revealed[0].worker_id, "worker_a");
        let shadow = dir.path().join("revealed").join("idea.md");
        assert_eq!(std::fs::read_to_string(shadow).unwrap(), "the idea");
    }

    #[tokio::test]
    async fn re_reveal_replaces_with_later_description() {
        let (tool, ctx, sink, _dir) = reveal_fixture();
        ctx.workspace.write("idea.md", b"v1").unwrap();
        tool.execute(json!({"filename": "idea.md", "description": "first"}), &ctx)
            .await;

        ctx.workspace.write("idea.md", b"v2").unwrap();
        tool.execute(json!({"filename": "idea.md", "description": "second"}), &ctx)
            .await;

        let revealed = sink.lock().unwrap();
        assert_eq!(revealed.len(), 1);
        assert_eq!(revealed[0].content, "v2");
        assert_eq!(revealed[0].description.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn revealing_missing_file_fails() {
        let (tool, ctx, sink, _dir) = reveal_fixture();
        let outcome = tool.execute(json!({"filename": "ghost.md"}), &ctx).await;
        assert!(outcome.is_error);
        assert!(sink.lock().unwrap().is_empty());
    }
}
