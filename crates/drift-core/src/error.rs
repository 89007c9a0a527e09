//! Error taxonomy for the runtime
//!
//! Tool-level failures are converted to tool results and fed back to the
//! model; everything here either rejects an input outright or bubbles to the
//! lifecycle controller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ai::ModelError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The agent cannot start without a goal.
    #[error("goal must not be empty")]
    RejectGoalEmpty,

    /// Compaction threshold outside the accepted band.
    #[error("compaction threshold {0} outside {min}..={max}",
        min = crate::constants::context::MIN_THRESHOLD,
        max = crate::constants::context::MAX_THRESHOLD)]
    ThresholdRange(f64),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("schema violation for tool '{tool}': {reason}")]
    SchemaViolation { tool: String, reason: String },

    /// A workspace path resolved outside its sandbox root.
    #[error("path escapes workspace: {}", .0.display())]
    PathEscape(PathBuf),

    #[error("tool handler failed: {0}")]
    HandlerFailure(String),

    #[error("tool timed out after {0:?}")]
    ToolTimeout(Duration),

    /// Protected tools cannot be deleted or overwritten.
    #[error("tool '{0}' is protected and cannot be modified")]
    ProtectedTool(String),

    /// Summarizing compaction failed; the context was left untouched.
    #[error("compaction failed: {0}")]
    CompactionFailed(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("factory reset requires confirm=true")]
    FactoryResetWithoutConfirm,

    /// Tournament stage widths must narrow monotonically.
    #[error("stage widths must be non-increasing and at least 1: {0:?}")]
    InvalidStages(Vec<usize>),

    #[error("tournament not found: {0}")]
    TournamentNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Whether this error should put the owning agent into the `error` state
    /// rather than being reported back into the conversation.
    pub fn is_fatal(&self) -> bool {
        match self {
            RuntimeError::Model(e) => e.is_fatal(),
            RuntimeError::CompactionFailed(_) | RuntimeError::Io(_) => true,
            _ => false,
        }
    }
}
