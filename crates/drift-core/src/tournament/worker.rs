//! Tournament worker construction
//!
//! A worker is a task-scoped `AgentCore` with its own workspace, its own
//! restricted tool registry, and a reveal sink. Workers never hold a
//! reference back to the engine; they communicate only through their
//! workspace and `reveal` calls.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::agent::cancellation::AgentCancellation;
use crate::agent::core::{
    control_pair, AgentControlHandle, AgentCore, AgentLoopSettings, AgentShared,
};
use crate::agent::logger::EventLog;
use crate::agent::prompt_queue::PromptQueue;
use crate::agent::status_bus::StatusBus;
use crate::ai::ModelClient;
use crate::context::ContextManager;
use crate::error::RuntimeError;
use crate::tools::implementations::{
    CompleteTaskTool, ListFilesTool, ManageContextTool, ReadFileTool, RunCodeTool, WriteFileTool,
};
use crate::tools::registry::ToolRegistry;
use crate::tools::workspace::WorkspaceFS;
use crate::tournament::engine::TournamentConfig;
use crate::tournament::tools::{RevealSink, RevealTool};
use crate::tournament::types::RevealedFile;

pub struct Worker {
    pub id: String,
    pub dir: PathBuf,
    pub workspace_path: PathBuf,
    pub core: AgentCore,
    pub reveals: RevealSink,
    /// Keeps the pause/control senders alive for the worker's lifetime.
    pub handle: AgentControlHandle,
}

/// Build an isolated worker under `dir` (`workspace/` plus a `revealed/`
/// shadow directory) with the restricted tournament tool set.
pub fn build_worker(
    client: Arc<dyn ModelClient>,
    log: Arc<EventLog>,
    config: &TournamentConfig,
    dir: &Path,
    topic: &str,
    stage_index: usize,
    has_inputs: bool,
    cancellation: AgentCancellation,
) -> Result<Worker, RuntimeError> {
    let id = format!("worker_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let workspace_path = dir.join("workspace");
    let shadow_dir = dir.join("revealed");
    std::fs::create_dir_all(&shadow_dir)?;
    let workspace = Arc::new(WorkspaceFS::create(&workspace_path)?);

    let reveals: RevealSink = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(ReadFileTool))?;
    registry.register(Arc::new(WriteFileTool))?;
    registry.register(Arc::new(ListFilesTool))?;
    if config.enable_code_execution {
        registry.register(Arc::new(RunCodeTool))?;
    }
    registry.register(Arc::new(CompleteTaskTool))?;
    registry.register(Arc::new(ManageContextTool))?;
    registry.register(Arc::new(RevealTool::new(
        id.clone(),
        shadow_dir,
        reveals.clone(),
    )))?;

    let shared = AgentShared {
        client,
        registry: registry.clone(),
        queue: Arc::new(PromptQueue::new()),
        bus: Arc::new(StatusBus::default()),
        log,
    };
    let settings = AgentLoopSettings {
        model: config.worker_model.clone(),
        summarizer_model: config.summarizer_model.clone(),
        temperature: config.temperature,
        max_response_tokens: config.max_response_tokens,
        max_turns: Some(config.worker_max_turns),
        task_timeout: Some(config.worker_timeout),
        continuous: false,
        code_timeout: config.code_timeout,
    };
    let mut context = ContextManager::new(config.context_max_tokens, config.compaction_threshold);
    context.set_system_prompt(worker_system_prompt(
        topic,
        stage_index,
        has_inputs,
        &registry.names(),
    ));

    let (handle, controls) = control_pair(cancellation);
    let core = AgentCore::new(id.clone(), settings, shared, context, workspace, controls);

    Ok(Worker {
        id,
        dir: dir.to_path_buf(),
        workspace_path,
        core,
        reveals,
        handle,
    })
}

/// System prompt for a tournament worker.
pub fn worker_system_prompt(
    topic: &str,
    stage_index: usize,
    has_inputs: bool,
    tool_names: &[String],
) -> String {
    let tools = tool_names.join(", ");
    if stage_index == 0 || !has_inputs {
        format!(
            "You are an autonomous agent participating in a collaborative tournament.\n\
             \n\
             ## Your Task\n\
             {topic}\n\
             \n\
             ## Available Tools\n\
             {tools}\n\
             \n\
             ## Instructions\n\
             1. Analyze the topic and develop your own approach\n\
             2. Create files in your workspace documenting your work\n\
             3. Use 'reveal' to share the files you want to contribute\n\
             4. Call 'complete_task' when you are done\n\
             \n\
             ## Guidelines\n\
             - Think carefully before starting\n\
             - Focus on quality over quantity\n\
             - Only revealed files are visible to anyone else"
        )
    } else {
        format!(
            "You are an autonomous agent in a synthesis stage of a collaborative tournament.\n\
             \n\
             ## Original Topic\n\
             {topic}\n\
             \n\
             ## Your Task\n\
             Review the contributions from the previous stage and synthesize the best \
             ideas into improved outputs.\n\
             \n\
             ## Available Tools\n\
             {tools}\n\
             \n\
             ## Instructions\n\
             1. Review all input files carefully\n\
             2. Identify the strongest ideas and combine them\n\
             3. Create new files with your synthesis and reveal them\n\
             4. Call 'complete_task' when you are done"
        )
    }
}

/// User message carrying the previous stage's revealed files.
pub fn synthesis_input_prompt(files: &[RevealedFile]) -> String {
    if files.is_empty() {
        return "No input files arrived from the previous stage. Start fresh.".to_string();
    }

    let summary = files
        .iter()
        .map(|f| {
            format!(
                "- {} (from {}): {}",
                f.filename,
                f.worker_id,
                f.description.as_deref().unwrap_or("no description")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let contents = files
        .iter()
        .map(|f| format!("### {}\n```\n{}\n```", f.filename, f.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Here are the revealed files from the previous stage:\n\n{summary}\n\n\
         {contents}\n\n\
         Review these carefully and reveal your synthesized outputs."
    )
}

/// Debate-round instructions carrying the peers' current reveal set.
pub fn debate_prompt(round: u32, peers: &[RevealedFile]) -> String {
    let contents = peers
        .iter()
        .map(|f| {
            format!(
                "### {} (from {})\n{}\n```\n{}\n```",
                f.filename,
                f.worker_id,
                f.description.as_deref().unwrap_or(""),
                f.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Debate round {round}. Your peers have revealed the following files:\n\n\
         {contents}\n\n\
         Critique their work against your own: what holds up, what is wrong, and \
         what you would change. If the critique changes your position, update your \
         files and reveal them again; otherwise your earlier reveals stand. \
         Summarize your critique-and-response in 'complete_task' when done."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reveal(filename: &str, worker: &str) -> RevealedFile {
        RevealedFile {
            filename: filename.to_string(),
            description: Some("a file".to_string()),
            content: "body".to_string(),
            worker_id: worker.to_string(),
            revealed_at: Utc::now(),
        }
    }

    #[test]
    fn initial_prompt_mentions_topic_and_reveal() {
        let prompt = worker_system_prompt("Pick between A and B", 0, false, &["reveal".to_string()]);
        assert!(prompt.contains("Pick between A and B"));
        assert!(prompt.contains("reveal"));
        assert!(!prompt.contains("synthesis stage"));
    }

    #[test]
    fn synthesis_prompt_used_for_later_stages() {
        let prompt = worker_system_prompt("topic", 1, true, &[]);
        assert!(prompt.contains("synthesis stage"));
    }

    #[test]
    fn synthesis_input_lists_files_and_contents() {
        let text = synthesis_input_prompt(&[reveal("choice.md", "w1")]);
        assert!(text.contains("choice.md"));
        assert!(text.contains("from w1"));
        assert!(text.contains("body"));
    }

    #[test]
    fn debate_prompt_carries_round_and_peers() {
        let text = debate_prompt(2, &[reveal("plan.md", "w9")]);
        assert!(text.contains("Debate round 2"));
        assert!(text.contains("plan.md"));
        assert!(text.contains("w9"));
    }
}
