//! Tournament data model
//!
//! A tournament is a staged funnel of isolated workers. Workers publish
//! artifacts through `reveal`; merged reveal sets flow between stages and the
//! final stage's set is the result.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::state::{CompletionReason, CompletionRecord};
use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// A workspace file published for downstream stages and debate peers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevealedFile {
    pub filename: String,
    pub description: Option<String>,
    pub content: String,
    pub worker_id: String,
    pub revealed_at: DateTime<Utc>,
}

/// Things that happened inside a stage, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    WorkerCompleted {
        worker_id: String,
        reason: CompletionReason,
        summary: String,
    },
    WorkerFailed {
        worker_id: String,
        error: String,
    },
    Critique {
        worker_id: String,
        round: u32,
        content: String,
    },
    /// Two workers revealed the same filename; the later reveal won.
    RevealCollision {
        filename: String,
        kept_from: String,
        replaced_from: String,
    },
}

/// Terminal record of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRecord {
    pub id: String,
    pub stage_index: usize,
    pub workspace: std::path::PathBuf,
    pub completion: Option<CompletionRecord>,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub index: usize,
    pub workers: Vec<WorkerRecord>,
    pub transcript: Vec<TranscriptEntry>,
    pub revealed: Vec<RevealedFile>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tournament {
    pub id: String,
    pub topic: String,
    pub stages: Vec<usize>,
    pub debate_rounds: u32,
    pub current_stage: usize,
    pub status: TournamentStatus,
    pub stage_records: Vec<StageRecord>,
    pub final_artifacts: Vec<RevealedFile>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Tournament {
    pub fn new(
        topic: impl Into<String>,
        stages: Vec<usize>,
        debate_rounds: u32,
    ) -> Result<Self, RuntimeError> {
        crate::config::validate_stages(&stages)?;
        Ok(Self {
            id: format!("tournament_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            topic: topic.into(),
            stages,
            debate_rounds,
            current_stage: 0,
            status: TournamentStatus::Pending,
            stage_records: Vec::new(),
            final_artifacts: Vec::new(),
            created_at: Utc::now(),
            error: None,
        })
    }
}

/// Merge a stage's reveals in worker completion order, de-duplicating by
/// filename. On collision the later reveal wins and the transcript gets a
/// note.
pub fn merge_reveals(
    reveals: Vec<RevealedFile>,
    transcript: &mut Vec<TranscriptEntry>,
) -> Vec<RevealedFile> {
    let mut merged: Vec<RevealedFile> = Vec::new();
    for reveal in reveals {
        if let Some(existing) = merged.iter_mut().find(|r| r.filename == reveal.filename) {
            if existing.worker_id != reveal.worker_id {
                transcript.push(TranscriptEntry::RevealCollision {
                    filename: reveal.filename.clone(),
                    kept_from: reveal.worker_id.clone(),
                    replaced_from: existing.worker_id.clone(),
                });
            }
            *existing = reveal;
        } else {
            merged.push(reveal);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reveal(filename: &str, worker: &str, content: &str) -> RevealedFile {
        RevealedFile {
            filename: filename.to_string(),
            description: None,
            content: content.to_string(),
            worker_id: worker.to_string(),
            revealed_at: Utc::now(),
        }
    }

    #[test]
    fn widening_stage_list_rejected() {
        assert!(matches!(
            Tournament::new("topic", vec![2, 3], 0),
            Err(RuntimeError::InvalidStages(_))
        ));
        Tournament::new("topic", vec![3, 2, 1], 0).unwrap();
    }

    #[test]
    fn merge_later_reveal_wins_with_collision_note() {
        let mut transcript = Vec::new();
        let merged = merge_reveals(
            vec![
                reveal("choice.md", "w1", "A"),
                reveal("notes.md", "w1", "n"),
                reveal("choice.md", "w2", "B"),
            ],
            &mut transcript,
        );

        assert_eq!(merged.len(), 2);
        let choice = merged.iter().find(|r| r.filename == "choice.md").unwrap();
        assert_eq!(choice.content, "B");
        assert_eq!(choice.worker_id, "w2");
        assert!(matches!(
            transcript.as_slice(),
            [TranscriptEntry::RevealCollision { filename, kept_from, replaced_from }]
                if filename == "choice.md" && kept_from == "w2" && replaced_from == "w1"
        ));
    }

    #[test]
    fn same_worker_re_reveal_is_not_a_collision() {
        let mut transcript = Vec::new();
        let merged = merge_reveals(
            vec![reveal("a.md", "w1", "v1"), reveal("a.md", "w1", "v2")],
            &mut transcript,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "v2");
        assert!(transcript.is_empty());
    }
}
