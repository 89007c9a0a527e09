//! drift-core - runtime for a long-running autonomous agent
//!
//! This crate provides the engine behind the drift CLI:
//! - An agent loop coordinating an LLM with a dynamic tool set
//! - Context-window management with summarizing compaction
//! - A sandboxed per-agent workspace filesystem
//! - A staged tournament orchestrator with debate rounds
//! - A control plane: lifecycle commands, prompt queue, status stream

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod tools;
pub mod tournament;

#[cfg(test)]
pub(crate) mod testsupport;

// Re-exports for convenience
pub use agent::{
    AgentCore, CompletionReason, CompletionRecord, EventLog, LifecycleController, LifecyclePhase,
    LogCategory, PromptPriority, Runtime, StatusSnapshot,
};
pub use ai::{ChatRequest, ChatResponse, HttpModelClient, Message, ModelClient, ModelError, Role};
pub use config::RuntimeConfig;
pub use context::ContextManager;
pub use error::RuntimeError;
pub use tools::{Tool, ToolOutcome, ToolRegistry, WorkspaceFS};
pub use tournament::{Tournament, TournamentEngine, TournamentStatus};
