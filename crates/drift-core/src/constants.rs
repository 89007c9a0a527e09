//! Runtime constants
//!
//! Centralized defaults and limits, avoiding magic numbers.

/// Context window defaults
pub mod context {
    /// Default context window budget in estimated tokens
    pub const DEFAULT_MAX_TOKENS: usize = 128_000;
    /// Default compaction trigger as a fraction of the budget
    pub const DEFAULT_THRESHOLD: f64 = 0.85;
    /// Number of trailing messages kept verbatim through compaction
    pub const PRESERVE_RECENT: usize = 4;
    /// Lowest threshold an operator or the agent may set
    pub const MIN_THRESHOLD: f64 = 0.1;
    /// Highest threshold an operator or the agent may set
    pub const MAX_THRESHOLD: f64 = 0.99;
    /// Per-message token overhead added to the character estimate
    pub const MESSAGE_OVERHEAD: usize = 4;
}

/// Timeout configurations
pub mod timeouts {
    use std::time::Duration;

    /// Default tool execution timeout
    pub const TOOL_EXECUTION: Duration = Duration::from_secs(30);
    /// Default sandboxed code execution timeout
    pub const CODE_EXECUTION: Duration = Duration::from_secs(30);
    /// Per-call model API timeout
    pub const MODEL_CALL: Duration = Duration::from_secs(120);
    /// Safety timeout for a single tournament worker
    pub const WORKER_SAFETY: Duration = Duration::from_secs(600);
    /// Grace period granted to an in-flight model call after Stop
    pub const CANCEL_GRACE: Duration = Duration::from_secs(5);
}

/// Agent loop pacing
pub mod pacing {
    use std::time::Duration;

    /// Delay between loop iterations in continuous mode
    pub const TURN_DELAY: Duration = Duration::from_millis(100);
    /// Delay between spawning sibling tournament workers
    pub const WORKER_STAGGER: Duration = Duration::from_millis(50);
}

/// Model call defaults
pub mod model {
    /// Sampling temperature
    pub const TEMPERATURE: f32 = 0.7;
    /// Maximum tokens per model response
    pub const MAX_RESPONSE_TOKENS: usize = 4096;
    /// Maximum tokens for a compaction summary
    pub const SUMMARY_MAX_TOKENS: usize = 2048;
}

/// Tournament defaults
pub mod tournament {
    /// Default funnel shape: workers per stage
    pub const DEFAULT_STAGES: &[usize] = &[4, 3, 2];
    /// Default peer-critique rounds per stage
    pub const DEFAULT_DEBATE_ROUNDS: u32 = 2;
    /// Maximum workers running concurrently within a stage
    pub const MAX_PARALLEL: usize = 8;
    /// Turn cap per worker phase
    pub const WORKER_MAX_TURNS: u32 = 50;
    /// Turn cap per worker debate round
    pub const DEBATE_MAX_TURNS: u32 = 10;
}

/// Observability limits
pub mod observability {
    /// Ring-buffer capacity of the in-memory event log
    pub const LOG_CAPACITY: usize = 1000;
    /// Status broadcast channel capacity
    pub const STATUS_CAPACITY: usize = 64;
}
