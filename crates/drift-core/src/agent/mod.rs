//! Agent loop engine and control plane
//!
//! ## Core components
//! - `AgentCore` — the turn-by-turn loop engine
//! - `LifecycleController` / `Runtime` — external commands and shared plumbing
//! - `PromptQueue` — priority FIFO injected at turn boundaries
//! - `StatusBus` — status snapshot publish/subscribe
//! - `EventLog` — categorized ring-buffer event log
//! - `AgentCancellation` — cooperative cancellation tree

pub mod cancellation;
pub mod core;
pub mod lifecycle;
pub mod logger;
pub mod prompt_queue;
pub mod state;
pub mod status_bus;

pub use cancellation::AgentCancellation;
pub use core::{
    build_system_prompt, control_pair, AgentControlHandle, AgentCore, AgentLoopSettings,
    AgentShared, ControlMsg,
};
pub use lifecycle::{LifecycleController, Runtime};
pub use logger::{EventLog, LogCategory, LogEntry};
pub use prompt_queue::{PromptPriority, PromptQueue, QueuedPrompt};
pub use state::{AgentState, CompletionReason, CompletionRecord, LifecyclePhase};
pub use status_bus::{StatusBus, StatusSnapshot};
