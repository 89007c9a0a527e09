//! Lifecycle control plane
//!
//! `Runtime` bundles the shared plumbing (client, registry, queue, bus, log,
//! sandbox, tournament engine) into one value threaded into agents; there are
//! no global singletons, and factory reset is "drop the runtime and build a
//! new one". `LifecycleController` serializes external commands onto the
//! running agent: redundant commands are no-ops, restart is atomic.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::agent::cancellation::AgentCancellation;
use crate::agent::core::{
    control_pair, AgentControlHandle, AgentCore, AgentLoopSettings, AgentShared,
};
use crate::agent::logger::{EventLog, LogCategory, LogEntry};
use crate::agent::prompt_queue::{PromptPriority, PromptQueue};
use crate::agent::status_bus::{StatusBus, StatusSnapshot};
use crate::ai::ModelClient;
use crate::config::RuntimeConfig;
use crate::context::ContextManager;
use crate::error::RuntimeError;
use crate::tools::implementations::{load_custom_tools, CreateToolTool, DeleteToolTool};
use crate::tools::{register_core_tools, ToolRegistry, WorkspaceFS};
use crate::tournament::{CallSubagentTool, RunTournamentTool, TournamentConfig, TournamentEngine};

/// The shared plumbing of one runtime generation.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub client: Arc<dyn ModelClient>,
    pub registry: Arc<ToolRegistry>,
    pub queue: Arc<PromptQueue>,
    pub bus: Arc<StatusBus>,
    pub log: Arc<EventLog>,
    pub workspace: Arc<WorkspaceFS>,
    pub tournaments: Arc<TournamentEngine>,
    /// Root token; cancelling it stops the agent and every tournament worker.
    pub cancellation: AgentCancellation,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        client: Arc<dyn ModelClient>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let workspace = Arc::new(WorkspaceFS::create(&config.sandbox.root)?);
        let log = Arc::new(EventLog::default());
        let cancellation = AgentCancellation::new();

        let registry = Arc::new(ToolRegistry::new());
        register_core_tools(&registry, config.agent.enable_code_execution)?;
        registry.register(Arc::new(CreateToolTool::new(&registry)))?;
        registry.register(Arc::new(DeleteToolTool::new(&registry)))?;
        let reloaded = load_custom_tools(&registry, &workspace)?;
        if reloaded > 0 {
            log.emit(
                LogCategory::Lifecycle,
                format!("reloaded {reloaded} custom tool(s) from the workspace"),
            );
        }

        let tournaments = Arc::new(TournamentEngine::new(
            client.clone(),
            config.sandbox.root.join("tournaments"),
            TournamentConfig::from_runtime(&config),
            log.clone(),
        ));
        registry.register(Arc::new(RunTournamentTool::new(
            tournaments.clone(),
            cancellation.clone(),
        )))?;
        registry.register(Arc::new(CallSubagentTool::new(
            tournaments.clone(),
            cancellation.clone(),
        )))?;

        Ok(Self {
            config,
            client,
            registry,
            queue: Arc::new(PromptQueue::new()),
            bus: Arc::new(StatusBus::default()),
            log,
            workspace,
            tournaments,
            cancellation,
        })
    }

    pub fn shared(&self) -> AgentShared {
        AgentShared {
            client: self.client.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            bus: self.bus.clone(),
            log: self.log.clone(),
        }
    }
}

struct ActiveAgent {
    handle: AgentControlHandle,
    task: JoinHandle<AgentCore>,
}

struct Inner {
    runtime: Runtime,
    goal: String,
    active: Option<ActiveAgent>,
    kept_context: Option<ContextManager>,
}

/// Mediates external commands onto the main agent.
pub struct LifecycleController {
    inner: tokio::sync::Mutex<Inner>,
}

impl LifecycleController {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(Inner {
                runtime,
                goal: String::new(),
                active: None,
                kept_context: None,
            }),
        }
    }

    /// Start the agent. Starting while running is a no-op; an empty goal is
    /// rejected.
    pub async fn start(&self, goal: Option<String>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        if inner.active.is_some() {
            inner
                .runtime
                .log
                .emit(LogCategory::Lifecycle, "start ignored; agent already running");
            return Ok(());
        }
        if let Some(goal) = goal {
            inner.goal = goal;
        }
        if inner.goal.trim().is_empty() {
            return Err(RuntimeError::RejectGoalEmpty);
        }
        Self::spawn_locked(&mut inner, None)
    }

    pub async fn pause(&self) {
        let inner = self.inner.lock().await;
        match &inner.active {
            Some(active) => active.handle.pause(),
            None => inner
                .runtime
                .log
                .emit(LogCategory::Lifecycle, "pause ignored; agent not running"),
        }
    }

    pub async fn resume(&self) {
        let inner = self.inner.lock().await;
        match &inner.active {
            Some(active) => active.handle.resume(),
            None => inner
                .runtime
                .log
                .emit(LogCategory::Lifecycle, "resume ignored; agent not running"),
        }
    }

    /// Stop the agent, waiting for the in-flight turn to wind down. Stopping
    /// while stopped is a no-op. The context is retained for a later
    /// keep-context start.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        Self::stop_locked(&mut inner).await;
    }

    /// Atomic restart: stop, quiesce, optionally reset context, optionally
    /// inject a prompt, run.
    pub async fn restart(
        &self,
        prompt: Option<String>,
        keep_context: bool,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        Self::stop_locked(&mut inner).await;
        if !keep_context {
            inner.kept_context = None;
        }
        if inner.goal.trim().is_empty() {
            return Err(RuntimeError::RejectGoalEmpty);
        }
        inner
            .runtime
            .log
            .emit(LogCategory::Lifecycle, "restarting agent");
        Self::spawn_locked(&mut inner, prompt)
    }

    /// Ask the running agent to compact at its next turn boundary.
    pub async fn force_compact(&self) {
        let inner = self.inner.lock().await;
        match &inner.active {
            Some(active) => active.handle.force_compact(),
            None => inner
                .runtime
                .log
                .emit(LogCategory::Lifecycle, "compact ignored; agent not running"),
        }
    }

    pub async fn send_prompt(&self, text: impl Into<String>, priority: PromptPriority) -> String {
        let inner = self.inner.lock().await;
        inner.runtime.queue.enqueue(text, priority)
    }

    pub async fn remove_prompt(&self, id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.runtime.queue.remove(id)
    }

    pub async fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StatusSnapshot> {
        self.inner.lock().await.runtime.bus.subscribe()
    }

    pub async fn status(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        inner
            .runtime
            .bus
            .latest()
            .unwrap_or_else(|| idle_snapshot(&inner.runtime))
    }

    pub async fn log_tail(&self, limit: usize, category: Option<LogCategory>) -> Vec<LogEntry> {
        self.inner.lock().await.runtime.log.tail(limit, category)
    }

    /// Destroy all agent state and return to a pristine idle runtime.
    ///
    /// Refuses without `confirm`. With `backup`, returns an archive of every
    /// file under the sandbox root at the moment of the call.
    pub async fn factory_reset(
        &self,
        confirm: bool,
        backup: bool,
    ) -> Result<Option<Vec<u8>>, RuntimeError> {
        if !confirm {
            return Err(RuntimeError::FactoryResetWithoutConfirm);
        }

        let mut inner = self.inner.lock().await;
        Self::stop_locked(&mut inner).await;
        inner.runtime.cancellation.cancel();

        let archive = if backup {
            Some(build_backup_archive(&inner.runtime.workspace)?)
        } else {
            None
        };

        inner.runtime.workspace.clear()?;
        inner.runtime.queue.clear();
        inner.goal.clear();
        inner.kept_context = None;
        inner
            .runtime
            .log
            .emit(LogCategory::Lifecycle, "factory reset complete");

        // Drop the old runtime generation and build a fresh one.
        let config = inner.runtime.config.clone();
        let client = inner.runtime.client.clone();
        inner.runtime = Runtime::new(config, client)?;
        inner.runtime.bus.publish(idle_snapshot(&inner.runtime));

        Ok(archive)
    }

    fn spawn_locked(inner: &mut Inner, initial_prompt: Option<String>) -> Result<(), RuntimeError> {
        let settings = AgentLoopSettings::from_config(&inner.runtime.config);
        let context = inner.kept_context.take().unwrap_or_else(|| {
            ContextManager::new(
                inner.runtime.config.context.max_tokens,
                inner.runtime.config.context.compaction_threshold,
            )
        });

        let (handle, controls) = control_pair(inner.runtime.cancellation.child());
        let core = AgentCore::new(
            "main_agent",
            settings,
            inner.runtime.shared(),
            context,
            inner.runtime.workspace.clone(),
            controls,
        );
        let task = tokio::spawn(core.run_main(inner.goal.clone(), initial_prompt));
        inner.active = Some(ActiveAgent { handle, task });
        Ok(())
    }

    async fn stop_locked(inner: &mut Inner) {
        let Some(active) = inner.active.take() else {
            inner
                .runtime
                .log
                .emit(LogCategory::Lifecycle, "stop ignored; agent not running");
            return;
        };
        active.handle.cancel();
        match active.task.await {
            Ok(core) => {
                inner.kept_context = Some(core.into_context());
            }
            Err(e) => {
                inner.runtime.log.emit_error("agent task join failed", &e);
            }
        }
    }
}

fn idle_snapshot(runtime: &Runtime) -> StatusSnapshot {
    StatusSnapshot {
        status: "idle".to_string(),
        loop_count: 0,
        total_tokens: 0,
        last_action: None,
        context_usage_percent: 0.0,
        queued_prompts: runtime.queue.snapshot(),
        todos_digest: None,
    }
}

/// Archive every file under the sandbox root as a JSON document mapping
/// relative paths to contents.
fn build_backup_archive(workspace: &WorkspaceFS) -> Result<Vec<u8>, RuntimeError> {
    let mut files = serde_json::Map::new();
    for (path, content) in workspace.walk_files()? {
        files.insert(
            path,
            serde_json::Value::String(String::from_utf8_lossy(&content).into_owned()),
        );
    }
    let archive = json!({
        "created_at": Utc::now().to_rfc3339(),
        "files": files,
    });
    Ok(serde_json::to_vec_pretty(&archive)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatResponse;
    use crate::testsupport::ScriptedModel;
    use std::time::Duration;
    use tempfile::TempDir;

    fn slow_client() -> Arc<ScriptedModel> {
        // An endless stream of idle thoughts, paced so tests can observe
        // intermediate states.
        let responses = (0..200).map(|i| ChatResponse::text(format!("thought {i}"))).collect();
        Arc::new(ScriptedModel::new(responses).with_delay(Duration::from_millis(10)))
    }

    fn controller_with(dir: &TempDir, client: Arc<ScriptedModel>) -> LifecycleController {
        let mut config = RuntimeConfig::default();
        config.sandbox.root = dir.path().join("sandbox");
        config.agent.continuous = true;
        let runtime = Runtime::new(config, client).unwrap();
        LifecycleController::new(runtime)
    }

    async fn wait_for_status(controller: &LifecycleController, wanted: &str) {
        for _ in 0..100 {
            if controller.status().await.status == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("status never became '{wanted}'");
    }

    #[tokio::test]
    async fn empty_goal_rejected() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());
        assert!(matches!(
            controller.start(None).await,
            Err(RuntimeError::RejectGoalEmpty)
        ));
        assert!(matches!(
            controller.start(Some("   ".to_string())).await,
            Err(RuntimeError::RejectGoalEmpty)
        ));
    }

    #[tokio::test]
    async fn start_stop_roundtrip() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        controller.start(Some("explore".to_string())).await.unwrap();
        wait_for_status(&controller, "running").await;

        controller.stop().await;
        assert_eq!(controller.status().await.status, "stopped");
    }

    #[tokio::test]
    async fn start_while_running_is_noop() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        controller.start(Some("explore".to_string())).await.unwrap();
        wait_for_status(&controller, "running").await;
        // Second start succeeds without spawning a second agent.
        controller.start(Some("other goal".to_string())).await.unwrap();
        controller.stop().await;
        // Stop again is also a no-op.
        controller.stop().await;
    }

    #[tokio::test]
    async fn pause_and_resume() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        controller.start(Some("explore".to_string())).await.unwrap();
        wait_for_status(&controller, "running").await;

        controller.pause().await;
        wait_for_status(&controller, "paused").await;

        controller.resume().await;
        wait_for_status(&controller, "running").await;

        controller.stop().await;
    }

    #[tokio::test]
    async fn restart_requires_goal() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());
        assert!(matches!(
            controller.restart(None, false).await,
            Err(RuntimeError::RejectGoalEmpty)
        ));
    }

    #[tokio::test]
    async fn restart_is_stop_plus_start() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        controller.start(Some("explore".to_string())).await.unwrap();
        wait_for_status(&controller, "running").await;

        controller
            .restart(Some("change of plans".to_string()), false)
            .await
            .unwrap();
        wait_for_status(&controller, "running").await;
        controller.stop().await;
    }

    #[tokio::test]
    async fn factory_reset_refused_without_confirm() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        // Seed the sandbox.
        {
            let inner = controller.inner.lock().await;
            inner.runtime.workspace.write("keep.txt", b"precious").unwrap();
            inner.runtime.queue.enqueue("queued", PromptPriority::Normal);
        }

        assert!(matches!(
            controller.factory_reset(false, true).await,
            Err(RuntimeError::FactoryResetWithoutConfirm)
        ));

        // Sandbox and queue unchanged.
        let inner = controller.inner.lock().await;
        assert_eq!(inner.runtime.workspace.read("keep.txt").unwrap(), "precious");
        assert_eq!(inner.runtime.queue.len(), 1);
    }

    #[tokio::test]
    async fn factory_reset_backs_up_and_clears() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        {
            let inner = controller.inner.lock().await;
            inner.runtime.workspace.write("notes/a.txt", b"alpha").unwrap();
            inner.runtime.workspace.write("b.txt", b"beta").unwrap();
            inner.runtime.queue.enqueue("pending prompt", PromptPriority::High);
        }

        let archive = controller.factory_reset(true, true).await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&archive).unwrap();
        assert_eq!(parsed["files"]["notes/a.txt"], "alpha");
        assert_eq!(parsed["files"]["b.txt"], "beta");

        let inner = controller.inner.lock().await;
        assert!(inner.runtime.workspace.list(".", true).unwrap().is_empty());
        assert!(inner.runtime.queue.is_empty());
        assert!(inner.goal.is_empty());
        assert_eq!(inner.runtime.bus.latest().unwrap().status, "idle");
    }

    #[tokio::test]
    async fn prompts_flow_through_controller() {
        let dir = TempDir::new().unwrap();
        let controller = controller_with(&dir, slow_client());

        let id = controller.send_prompt("look at this", PromptPriority::High).await;
        assert!(controller.remove_prompt(&id).await);
        assert!(!controller.remove_prompt(&id).await);
    }
}
