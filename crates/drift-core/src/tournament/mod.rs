//! Staged tournament orchestration
//!
//! Parallel worker agents narrow through a funnel of stages, exchanging peer
//! critiques in debate rounds and publishing artifacts through `reveal`.

pub mod engine;
pub mod tools;
pub mod types;
pub mod worker;

pub use engine::{SubagentOutcome, TournamentConfig, TournamentEngine};
pub use tools::{CallSubagentTool, RevealTool, RunTournamentTool};
pub use types::{
    RevealedFile, StageRecord, Tournament, TournamentStatus, TranscriptEntry, WorkerRecord,
};
