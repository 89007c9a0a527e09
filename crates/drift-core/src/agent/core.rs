//! The agent loop engine
//!
//! One `AgentCore` pairs a context manager and a sandboxed workspace with a
//! model client and a tool registry, and runs the request/dispatch cycle:
//! drain queued prompts, compact if needed, call the model, execute the
//! reply's tool calls in order, feed results back, repeat.
//!
//! `complete_task` is the sole termination authority for a task-scoped run.
//! In continuous mode it only closes the current sub-task and the loop keeps
//! going.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::agent::cancellation::AgentCancellation;
use crate::agent::logger::{EventLog, LogCategory};
use crate::agent::prompt_queue::PromptQueue;
use crate::agent::state::{AgentState, CompletionReason, CompletionRecord, LifecyclePhase};
use crate::agent::status_bus::StatusBus;
use crate::ai::{ChatRequest, Message, ModelClient, ToolCall};
use crate::config::RuntimeConfig;
use crate::constants::{pacing, timeouts};
use crate::context::ContextManager;
use crate::error::RuntimeError;
use crate::tools::registry::{
    strip_description, RegistrySnapshot, ToolContext, ToolOutcome, ToolRegistry,
    COMPLETE_TASK_TOOL, MANAGE_CONTEXT_TOOL,
};
use crate::tools::workspace::WorkspaceFS;

/// Loop-level settings for one agent.
#[derive(Debug, Clone)]
pub struct AgentLoopSettings {
    pub model: String,
    pub summarizer_model: String,
    pub temperature: f32,
    pub max_response_tokens: usize,
    /// Total turn cap; `None` runs unbounded.
    pub max_turns: Option<u32>,
    /// Wall-clock cap for a task-scoped run; `None` runs unbounded.
    pub task_timeout: Option<Duration>,
    /// Continuous mode re-prompts after each `complete_task`.
    pub continuous: bool,
    pub code_timeout: Duration,
}

impl AgentLoopSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            model: config.model.main.clone(),
            summarizer_model: config.model.summarizer_model().to_string(),
            temperature: config.agent.temperature,
            max_response_tokens: config.agent.max_response_tokens,
            max_turns: config.agent.max_turns,
            task_timeout: config.agent.timeout_seconds.map(Duration::from_secs),
            continuous: config.agent.continuous,
            code_timeout: Duration::from_secs(config.agent.code_timeout_seconds),
        }
    }
}

/// Shared plumbing threaded into every agent instead of global singletons.
#[derive(Clone)]
pub struct AgentShared {
    pub client: Arc<dyn ModelClient>,
    pub registry: Arc<ToolRegistry>,
    pub queue: Arc<PromptQueue>,
    pub bus: Arc<StatusBus>,
    pub log: Arc<EventLog>,
}

/// Out-of-band commands consumed at turn boundaries.
#[derive(Debug)]
pub enum ControlMsg {
    ForceCompact,
}

/// External side of the control channels.
#[derive(Clone)]
pub struct AgentControlHandle {
    pause: Arc<watch::Sender<bool>>,
    control: mpsc::UnboundedSender<ControlMsg>,
    pub cancellation: AgentCancellation,
}

impl AgentControlHandle {
    pub fn pause(&self) {
        let _ = self.pause.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn force_compact(&self) {
        let _ = self.control.send(ControlMsg::ForceCompact);
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

/// Agent side of the control channels.
pub struct AgentControls {
    pause: watch::Receiver<bool>,
    control: mpsc::UnboundedReceiver<ControlMsg>,
    cancellation: AgentCancellation,
}

/// Build a linked control handle/receiver pair.
pub fn control_pair(cancellation: AgentCancellation) -> (AgentControlHandle, AgentControls) {
    let (pause_tx, pause_rx) = watch::channel(false);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    (
        AgentControlHandle {
            pause: Arc::new(pause_tx),
            control: control_tx,
            cancellation: cancellation.clone(),
        },
        AgentControls {
            pause: pause_rx,
            control: control_rx,
            cancellation,
        },
    )
}

/// What a single turn produced.
#[derive(Debug)]
enum TurnOutcome {
    /// Tool calls were dispatched.
    Acted,
    /// Text-only reply; an idle thought.
    Idle,
    Completed(CompletionRecord),
    Cancelled,
}

enum Gate {
    Proceed,
    Stopped,
}

pub struct AgentCore {
    id: String,
    settings: AgentLoopSettings,
    shared: AgentShared,
    context: ContextManager,
    workspace: Arc<WorkspaceFS>,
    controls: AgentControls,
    state: AgentState,
}

impl AgentCore {
    pub fn new(
        id: impl Into<String>,
        settings: AgentLoopSettings,
        shared: AgentShared,
        context: ContextManager,
        workspace: Arc<WorkspaceFS>,
        controls: AgentControls,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            shared,
            context,
            workspace,
            controls,
            state: AgentState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    /// Hand the context back out, e.g. for a keep-context restart.
    pub fn into_context(self) -> ContextManager {
        self.context
    }

    pub fn workspace(&self) -> &Arc<WorkspaceFS> {
        &self.workspace
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.context.set_system_prompt(prompt);
    }

    fn publish_status(&self) {
        self.shared.bus.publish(self.state.snapshot(
            self.context.usage_percent(),
            self.shared.queue.snapshot(),
            None,
        ));
    }

    fn set_phase(&mut self, phase: LifecyclePhase) {
        if self.state.phase != phase {
            self.state.phase = phase;
            self.shared
                .log
                .emit(LogCategory::Lifecycle, format!("agent {} -> {phase}", self.id));
            self.publish_status();
        }
    }

    /// Entry point for a spawned main agent. Sets the system prompt, then
    /// runs continuous or task-scoped per settings; failures land in the
    /// agent state rather than escaping the task.
    pub async fn run_main(mut self, goal: String, initial_prompt: Option<String>) -> AgentCore {
        let prompt = build_system_prompt(
            &goal,
            &self.shared.registry.names(),
            self.context.threshold(),
        );
        self.context.set_system_prompt(prompt);
        if let Some(text) = initial_prompt {
            self.context.append(Message::user(text));
        }

        let result = if self.settings.continuous {
            self.run_continuous().await
        } else {
            match self.settings.task_timeout {
                Some(limit) => match tokio::time::timeout(limit, self.run_task(None)).await {
                    Ok(result) => result.map(|_| ()),
                    Err(_) => {
                        self.shared.log.emit(
                            LogCategory::Lifecycle,
                            format!("task timed out after {}s", limit.as_secs()),
                        );
                        self.set_phase(LifecyclePhase::Stopped);
                        Ok(())
                    }
                },
                None => self.run_task(None).await.map(|_| ()),
            }
        };
        if let Err(e) = result {
            warn!(agent = %self.id, error = %e, "agent run ended with error");
        }
        self
    }

    /// Run forever, treating each `complete_task` as closing a sub-task.
    pub async fn run_continuous(&mut self) -> Result<(), RuntimeError> {
        self.state.started_at = Some(chrono::Utc::now());
        self.set_phase(LifecyclePhase::Running);

        loop {
            if let Gate::Stopped = self.gate().await {
                self.set_phase(LifecyclePhase::Stopped);
                return Ok(());
            }

            match self.turn().await {
                Ok(TurnOutcome::Completed(record)) => {
                    // Sub-task closed; the loop keeps going with its context.
                    self.shared.log.emit_described(
                        LogCategory::Lifecycle,
                        format!("sub-task closed ({:?})", record.reason),
                        record.summary.clone(),
                    );
                }
                Ok(TurnOutcome::Cancelled) => {
                    self.set_phase(LifecyclePhase::Stopped);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(self.fail(e)),
            }

            if let Some(max) = self.settings.max_turns {
                if self.state.loop_count >= u64::from(max) {
                    self.shared.log.emit(
                        LogCategory::Lifecycle,
                        format!("halting after {max} turns (max_turns_exceeded)"),
                    );
                    self.set_phase(LifecyclePhase::Stopped);
                    return Ok(());
                }
            }

            tokio::select! {
                _ = self.controls.cancellation.cancelled() => {}
                _ = tokio::time::sleep(pacing::TURN_DELAY) => {}
            }
        }
    }

    /// Run until `complete_task`, the turn cap, or cancellation.
    pub async fn run_task(
        &mut self,
        initial_prompt: Option<String>,
    ) -> Result<CompletionRecord, RuntimeError> {
        let cap = self.settings.max_turns;
        self.run_bounded(initial_prompt, cap).await
    }

    /// Task-scoped run with an explicit turn cap, reusable across phases
    /// (tournament work, then each debate round).
    pub async fn run_bounded(
        &mut self,
        initial_prompt: Option<String>,
        turn_cap: Option<u32>,
    ) -> Result<CompletionRecord, RuntimeError> {
        if let Some(text) = initial_prompt {
            self.context.append(Message::user(text));
        }
        if self.state.started_at.is_none() {
            self.state.started_at = Some(chrono::Utc::now());
        }
        self.set_phase(LifecyclePhase::Running);

        let mut turns_used = 0u32;
        loop {
            if let Gate::Stopped = self.gate().await {
                self.set_phase(LifecyclePhase::Stopped);
                return Ok(CompletionRecord::new(
                    CompletionReason::Error,
                    "cancelled before completion",
                ));
            }

            match self.turn().await {
                Ok(TurnOutcome::Completed(record)) => {
                    self.set_phase(LifecyclePhase::Stopped);
                    return Ok(record);
                }
                Ok(TurnOutcome::Cancelled) => {
                    self.set_phase(LifecyclePhase::Stopped);
                    return Ok(CompletionRecord::new(
                        CompletionReason::Error,
                        "cancelled before completion",
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(self.fail(e)),
            }

            turns_used += 1;
            if let Some(cap) = turn_cap {
                if turns_used >= cap {
                    self.shared.log.emit(
                        LogCategory::Lifecycle,
                        format!("agent {} exhausted {cap} turns", self.id),
                    );
                    self.set_phase(LifecyclePhase::Stopped);
                    return Ok(CompletionRecord::new(
                        CompletionReason::MaxTurnsExceeded,
                        format!("turn cap of {cap} reached before complete_task"),
                    ));
                }
            }
        }
    }

    /// Record a fatal failure: error state, cause retained, terminal log
    /// entry and status snapshot.
    fn fail(&mut self, error: RuntimeError) -> RuntimeError {
        self.state.last_error = Some(error.to_string());
        self.shared
            .log
            .emit_error(format!("agent {} failed", self.id), &error);
        self.set_phase(LifecyclePhase::Error);
        error
    }

    /// Block while paused; report whether the loop should stop.
    async fn gate(&mut self) -> Gate {
        loop {
            if self.controls.cancellation.is_cancelled() {
                self.set_phase(LifecyclePhase::Stopping);
                return Gate::Stopped;
            }
            if !*self.controls.pause.borrow() {
                if self.state.phase == LifecyclePhase::Paused {
                    self.set_phase(LifecyclePhase::Running);
                }
                return Gate::Proceed;
            }

            self.set_phase(LifecyclePhase::Paused);
            tokio::select! {
                _ = self.controls.cancellation.cancelled() => {}
                changed = self.controls.pause.changed() => {
                    if changed.is_err() {
                        self.set_phase(LifecyclePhase::Stopping);
                        return Gate::Stopped;
                    }
                }
            }
        }
    }

    /// One iteration: inject prompts, compact, call the model, dispatch.
    async fn turn(&mut self) -> Result<TurnOutcome, RuntimeError> {
        while let Ok(msg) = self.controls.control.try_recv() {
            match msg {
                ControlMsg::ForceCompact => {
                    let summary = self.compact().await?;
                    info!(agent = %self.id, summary_len = summary.len(), "forced compaction");
                }
            }
        }

        for prompt in self.shared.queue.drain() {
            self.shared.log.emit_described(
                LogCategory::Lifecycle,
                format!("injected queued prompt {}", prompt.id),
                prompt.text.clone(),
            );
            self.context.append(Message::user(format!(
                "[USER PROMPT]\nThe user has sent you the following message:\n\n{}",
                prompt.text
            )));
        }

        if self.context.should_compact() {
            self.compact().await?;
        }

        let registry = self.shared.registry.snapshot();
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: self.context.messages().to_vec(),
            tools: registry.advertised(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_response_tokens,
        };

        let response = {
            let chat = self.shared.client.chat(request);
            tokio::pin!(chat);
            let result = tokio::select! {
                result = &mut chat => Some(result),
                _ = self.controls.cancellation.cancelled() => {
                    // Stop flipped mid-call: let the in-flight request finish
                    // within the grace deadline instead of dropping it.
                    tokio::time::timeout(timeouts::CANCEL_GRACE, &mut chat)
                        .await
                        .ok()
                }
            };
            match result {
                Some(result) => result?,
                None => return Ok(TurnOutcome::Cancelled),
            }
        };

        self.state.total_tokens += response.usage.total_tokens;
        let content = response.content.clone().unwrap_or_default();
        self.context.append(Message::assistant_with_calls(
            content.clone(),
            response.tool_calls.clone(),
        ));
        self.shared.log.emit(
            LogCategory::Llm,
            format!(
                "model reply: {} tool call(s), finish_reason={}",
                response.tool_calls.len(),
                response.finish_reason
            ),
        );

        // A call that finished inside the grace window is recorded, but no
        // new tool dispatches begin once stop has been requested.
        if self.controls.cancellation.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        if response.tool_calls.is_empty() {
            if !content.is_empty() {
                self.state.last_action = Some("response".to_string());
            }
            self.state.loop_count += 1;
            self.publish_status();
            return Ok(TurnOutcome::Idle);
        }

        let completion = self.dispatch_calls(&registry, &response.tool_calls).await;
        self.state.loop_count += 1;
        self.publish_status();

        Ok(match completion {
            Some(record) => TurnOutcome::Completed(record),
            None => TurnOutcome::Acted,
        })
    }

    /// Execute the reply's tool calls in emitted order. A `complete_task`
    /// records the completion and every later call in the reply is ignored.
    async fn dispatch_calls(
        &mut self,
        registry: &RegistrySnapshot,
        calls: &[ToolCall],
    ) -> Option<CompletionRecord> {
        let mut completion: Option<CompletionRecord> = None;

        for call in calls {
            if completion.is_some() {
                self.shared.log.emit(
                    LogCategory::Tool,
                    format!("ignoring '{}' after complete_task", call.name),
                );
                self.context.append(Message::tool_result(
                    &call.id,
                    json!({"ignored": "task already completed"}).to_string(),
                ));
                continue;
            }

            let mut args = call.arguments.clone();
            let description = strip_description(&mut args);

            if call.name == COMPLETE_TASK_TOOL {
                let record = CompletionRecord::from_args(&args);
                self.context.append(Message::tool_result(
                    &call.id,
                    json!({"success": true, "message": "task marked as complete"}).to_string(),
                ));
                self.shared.log.emit_tool(
                    &call.name,
                    args,
                    description,
                    format!("task completed ({:?})", record.reason),
                );
                self.state.last_action = Some("complete_task".to_string());
                completion = Some(record);
                continue;
            }

            let outcome = if call.name == MANAGE_CONTEXT_TOOL {
                self.handle_manage_context(&args).await
            } else {
                let ctx = ToolContext::new(self.workspace.clone())
                    .with_code_timeout(self.settings.code_timeout);
                match registry.invoke(&call.name, call.arguments.clone(), &ctx).await {
                    Ok(invocation) => invocation.outcome,
                    // Unknown tool or schema violation: the model reacts.
                    Err(e) => ToolOutcome::error(e),
                }
            };

            self.shared.log.emit_tool(
                &call.name,
                args,
                description,
                format!(
                    "tool {}: {}",
                    call.name,
                    if outcome.is_error { "failed" } else { "ok" }
                ),
            );
            self.context
                .append(Message::tool_result(&call.id, outcome.output.clone()));
            self.state.last_action = Some(format!("tool:{}", call.name));
        }

        completion
    }

    /// The `manage_context` control tool, executed against the agent's own
    /// context. Manual compaction failures are reported, not fatal.
    async fn handle_manage_context(&mut self, args: &Value) -> ToolOutcome {
        match args.get("action").and_then(|a| a.as_str()) {
            Some("get_status") => match serde_json::to_value(self.context.status()) {
                Ok(status) => ToolOutcome::success_json(status),
                Err(e) => ToolOutcome::error(e),
            },
            Some("set_threshold") => {
                let Some(threshold) = args.get("threshold").and_then(|t| t.as_f64()) else {
                    return ToolOutcome::error("threshold parameter required");
                };
                match self.context.set_threshold(threshold) {
                    Ok(()) => ToolOutcome::success_json(json!({
                        "success": true,
                        "new_threshold": threshold,
                    })),
                    Err(e) => ToolOutcome::error(e),
                }
            }
            Some("compact_now") => match self.compact().await {
                Ok(summary) => ToolOutcome::success_json(json!({
                    "success": true,
                    "summary_length": summary.len(),
                })),
                Err(e) => ToolOutcome::error(e),
            },
            other => ToolOutcome::error(format!("unknown action: {other:?}")),
        }
    }

    async fn compact(&mut self) -> Result<String, RuntimeError> {
        let usage_before = self.context.usage_percent();
        let summary = self
            .context
            .compact(
                self.shared.client.as_ref(),
                &self.settings.summarizer_model,
            )
            .await?;
        self.shared.log.emit(
            LogCategory::Context,
            format!(
                "compacted context: {:.1}% -> {:.1}%",
                usage_before * 100.0,
                self.context.usage_percent() * 100.0
            ),
        );
        Ok(summary)
    }
}

/// System prompt for a main agent.
pub fn build_system_prompt(goal: &str, tool_names: &[String], threshold: f64) -> String {
    format!(
        "You are an autonomous agent working continuously toward a goal.\n\
         \n\
         ## Your Current Goal\n\
         {goal}\n\
         \n\
         ## Your Capabilities\n\
         You have access to these tools: {tools}\n\
         \n\
         ## Guidelines\n\
         1. Work autonomously toward your goal, one concrete step at a time\n\
         2. Keep your workspace organized; write findings to files\n\
         3. Learn from failed attempts instead of repeating them\n\
         4. Call 'complete_task' when the current task is done\n\
         \n\
         ## Context Management\n\
         Your context is compacted automatically at {threshold:.0}% usage.\n\
         You can manage it yourself with 'manage_context'.",
        goal = goal,
        tools = tool_names.join(", "),
        threshold = threshold * 100.0,
    )
}
