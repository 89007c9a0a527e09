//! Tournament orchestrator
//!
//! Runs a staged funnel of isolated workers. Workers in a stage run
//! concurrently under a semaphore with staggered spawning; stages run
//! strictly sequentially. Between a stage's work phase and the next stage,
//! debate rounds let workers critique each other's revealed files.
//!
//! One worker failing never aborts its stage; a stage fails only when it
//! yields zero revealed artifacts, and that failure finishes the tournament.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::agent::cancellation::AgentCancellation;
use crate::agent::logger::{EventLog, LogCategory};
use crate::agent::state::{CompletionReason, CompletionRecord};
use crate::ai::ModelClient;
use crate::config::RuntimeConfig;
use crate::constants::{pacing, tournament as tournament_consts};
use crate::error::RuntimeError;
use crate::tournament::types::{
    merge_reveals, RevealedFile, StageRecord, Tournament, TournamentStatus, TranscriptEntry,
    WorkerRecord,
};
use crate::tournament::worker::{build_worker, debate_prompt, synthesis_input_prompt, Worker};

/// Engine-level configuration, derived from the runtime config.
#[derive(Debug, Clone)]
pub struct TournamentConfig {
    pub worker_model: String,
    pub summarizer_model: String,
    pub temperature: f32,
    pub max_response_tokens: usize,
    pub context_max_tokens: usize,
    pub compaction_threshold: f64,
    pub enable_code_execution: bool,
    pub code_timeout: Duration,
    pub max_parallel: usize,
    pub worker_max_turns: u32,
    pub debate_max_turns: u32,
    pub worker_timeout: Duration,
    pub default_stages: Vec<usize>,
    pub default_debate_rounds: u32,
    pub stagger: Duration,
}

impl TournamentConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            worker_model: config.model.worker_model().to_string(),
            summarizer_model: config.model.summarizer_model().to_string(),
            temperature: config.agent.temperature,
            max_response_tokens: config.agent.max_response_tokens,
            context_max_tokens: config.context.max_tokens,
            compaction_threshold: config.context.compaction_threshold,
            enable_code_execution: config.agent.enable_code_execution,
            code_timeout: Duration::from_secs(config.agent.code_timeout_seconds),
            max_parallel: config.tournament.max_parallel,
            worker_max_turns: config.tournament.worker_max_turns,
            debate_max_turns: tournament_consts::DEBATE_MAX_TURNS,
            worker_timeout: Duration::from_secs(config.tournament.worker_timeout_seconds),
            default_stages: config.tournament.default_stages.clone(),
            default_debate_rounds: config.tournament.default_debate_rounds,
            stagger: pacing::WORKER_STAGGER,
        }
    }
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default())
    }
}

/// Result of a one-off `call_subagent` worker.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentOutcome {
    pub worker_id: String,
    pub completion: Option<CompletionRecord>,
    pub revealed: Vec<RevealedFile>,
    pub failed: bool,
}

struct Slot {
    worker: Worker,
    completion: Option<CompletionRecord>,
    failed: bool,
}

type PhaseResult = Result<Result<CompletionRecord, RuntimeError>, tokio::time::error::Elapsed>;

pub struct TournamentEngine {
    client: Arc<dyn ModelClient>,
    base_path: PathBuf,
    config: TournamentConfig,
    log: Arc<EventLog>,
    tournaments: Mutex<HashMap<String, Tournament>>,
}

impl TournamentEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        base_path: impl Into<PathBuf>,
        config: TournamentConfig,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            client,
            base_path: base_path.into(),
            config,
            log,
            tournaments: Mutex::new(HashMap::new()),
        }
    }

    /// Create a tournament, validating the stage shape.
    pub fn create(
        &self,
        topic: &str,
        stages: Option<Vec<usize>>,
        debate_rounds: Option<u32>,
    ) -> Result<String, RuntimeError> {
        let tournament = Tournament::new(
            topic,
            stages.unwrap_or_else(|| self.config.default_stages.clone()),
            debate_rounds.unwrap_or(self.config.default_debate_rounds),
        )?;
        let id = tournament.id.clone();
        self.log.emit(
            LogCategory::Tournament,
            format!("created {id} with stages {:?}", tournament.stages),
        );
        self.tournaments.lock().unwrap().insert(id.clone(), tournament);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Tournament> {
        self.tournaments.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Tournament> {
        let mut all: Vec<Tournament> = self.tournaments.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Tournament)) {
        if let Some(tournament) = self.tournaments.lock().unwrap().get_mut(id) {
            apply(tournament);
        }
    }

    /// Run a tournament to completion or failure.
    pub async fn run(
        &self,
        id: &str,
        cancellation: &AgentCancellation,
    ) -> Result<Tournament, RuntimeError> {
        let (topic, stages, debate_rounds) = {
            let tournaments = self.tournaments.lock().unwrap();
            let tournament = tournaments
                .get(id)
                .ok_or_else(|| RuntimeError::TournamentNotFound(id.to_string()))?;
            (
                tournament.topic.clone(),
                tournament.stages.clone(),
                tournament.debate_rounds,
            )
        };
        self.update(id, |t| t.status = TournamentStatus::Running);
        info!(tournament = id, ?stages, "tournament starting");

        let mut incoming: Vec<RevealedFile> = Vec::new();
        for (stage_index, &width) in stages.iter().enumerate() {
            self.update(id, |t| t.current_stage = stage_index);
            self.log.emit(
                LogCategory::Tournament,
                format!("{id}: stage {} starting with {width} worker(s)", stage_index + 1),
            );

            let record = self
                .run_stage(id, &topic, stage_index, width, &incoming, debate_rounds, cancellation)
                .await?;
            let revealed = record.revealed.clone();
            self.update(id, |t| t.stage_records.push(record));

            if revealed.is_empty() {
                let cause = format!("stage {} produced no artifacts", stage_index + 1);
                warn!(tournament = id, "{cause}");
                self.log.emit_error(format!("{id} failed"), &cause);
                self.update(id, |t| {
                    t.status = TournamentStatus::Failed;
                    t.error = Some(cause);
                });
                return Ok(self.get(id).expect("tournament present while running"));
            }

            self.log.emit(
                LogCategory::Tournament,
                format!(
                    "{id}: stage {} completed with {} artifact(s)",
                    stage_index + 1,
                    revealed.len()
                ),
            );
            incoming = revealed;
        }

        // Shadow-copy the winning set for audit.
        let output_dir = self.base_path.join(id).join("final_output");
        for artifact in &incoming {
            let path = output_dir.join(&artifact.filename);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &artifact.content)?;
        }

        self.update(id, |t| {
            t.final_artifacts = incoming;
            t.status = TournamentStatus::Complete;
        });
        info!(tournament = id, "tournament complete");
        Ok(self.get(id).expect("tournament present while running"))
    }

    /// Run one stage: spawn workers, wait for their `complete_task`, run the
    /// debate rounds, then collect the merged reveal set.
    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        id: &str,
        topic: &str,
        stage_index: usize,
        width: usize,
        incoming: &[RevealedFile],
        debate_rounds: u32,
        cancellation: &AgentCancellation,
    ) -> Result<StageRecord, RuntimeError> {
        let started_at = Utc::now();
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));

        let mut handles = Vec::with_capacity(width);
        for j in 0..width {
            if j > 0 && !self.config.stagger.is_zero() {
                sleep(self.config.stagger).await;
            }

            let dir = self
                .base_path
                .join(id)
                .join(format!("stage_{}_worker_{}", stage_index + 1, j + 1));
            let mut worker = build_worker(
                self.client.clone(),
                self.log.clone(),
                &self.config,
                &dir,
                topic,
                stage_index,
                !incoming.is_empty(),
                cancellation.child(),
            )?;

            let initial = (stage_index > 0).then(|| synthesis_input_prompt(incoming));
            let sem = semaphore.clone();
            let cap = self.config.worker_max_turns;
            let safety = self.config.worker_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await;
                let result = timeout(safety, worker.core.run_bounded(initial, Some(cap))).await;
                (j, worker, result)
            }));
        }

        let mut slots: Vec<Option<Slot>> = (0..width).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((j, worker, result)) => {
                    slots[j] = Some(settle_worker(worker, result, &mut transcript));
                }
                Err(e) => {
                    warn!(tournament = id, error = %e, "worker task panicked");
                    transcript.push(TranscriptEntry::WorkerFailed {
                        worker_id: "unknown".to_string(),
                        error: format!("worker task panicked: {e}"),
                    });
                }
            }
        }
        let mut slots: Vec<Slot> = slots.into_iter().flatten().collect();

        for round in 1..=debate_rounds {
            slots = self
                .run_debate_round(id, round, slots, &semaphore, &mut transcript)
                .await;
        }

        let mut all_reveals = Vec::new();
        for slot in &slots {
            all_reveals.extend(slot.worker.reveals.lock().unwrap().iter().cloned());
        }
        let revealed = merge_reveals(all_reveals, &mut transcript);

        let workers = slots
            .iter()
            .map(|slot| WorkerRecord {
                id: slot.worker.id.clone(),
                stage_index,
                workspace: slot.worker.workspace_path.clone(),
                completion: slot.completion.clone(),
                failed: slot.failed,
            })
            .collect();

        Ok(StageRecord {
            index: stage_index,
            workers,
            transcript,
            revealed,
            started_at,
            completed_at: Some(Utc::now()),
        })
    }

    /// One debate round: each surviving worker sees its peers' current
    /// reveals (never its own) and produces a critique-and-response.
    /// Critiques extend the transcript; only further `reveal` calls change
    /// the revealed set.
    async fn run_debate_round(
        &self,
        id: &str,
        round: u32,
        slots: Vec<Slot>,
        semaphore: &Arc<Semaphore>,
        transcript: &mut Vec<TranscriptEntry>,
    ) -> Vec<Slot> {
        let reveal_snapshots: Vec<Vec<RevealedFile>> = slots
            .iter()
            .map(|s| s.worker.reveals.lock().unwrap().clone())
            .collect();

        let mut settled: Vec<Option<Slot>> = (0..slots.len()).map(|_| None).collect();
        let mut handles = Vec::new();
        let mut spawned = 0usize;
        for (idx, mut slot) in slots.into_iter().enumerate() {
            let peers: Vec<RevealedFile> = reveal_snapshots
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .flat_map(|(_, reveals)| reveals.iter().cloned())
                .collect();

            if slot.failed || peers.is_empty() {
                settled[idx] = Some(slot);
                continue;
            }

            if spawned > 0 && !self.config.stagger.is_zero() {
                sleep(self.config.stagger).await;
            }
            spawned += 1;

            let prompt = debate_prompt(round, &peers);
            let sem = semaphore.clone();
            let cap = self.config.debate_max_turns;
            let safety = self.config.worker_timeout;
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await;
                let result = timeout(safety, slot.worker.core.run_bounded(Some(prompt), Some(cap))).await;
                (idx, slot, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((idx, mut slot, result)) => {
                    match result {
                        Ok(Ok(record)) => {
                            transcript.push(TranscriptEntry::Critique {
                                worker_id: slot.worker.id.clone(),
                                round,
                                content: record.summary,
                            });
                        }
                        Ok(Err(e)) => {
                            slot.failed = true;
                            transcript.push(TranscriptEntry::WorkerFailed {
                                worker_id: slot.worker.id.clone(),
                                error: format!("debate round {round}: {e}"),
                            });
                        }
                        Err(_) => {
                            slot.failed = true;
                            transcript.push(TranscriptEntry::WorkerFailed {
                                worker_id: slot.worker.id.clone(),
                                error: format!("debate round {round}: safety timeout"),
                            });
                        }
                    }
                    settled[idx] = Some(slot);
                }
                Err(e) => {
                    warn!(tournament = id, error = %e, "debate task panicked");
                    transcript.push(TranscriptEntry::WorkerFailed {
                        worker_id: "unknown".to_string(),
                        error: format!("debate round {round} task panicked: {e}"),
                    });
                }
            }
        }

        settled.into_iter().flatten().collect()
    }

    /// Run a single isolated worker on a task until `complete_task`.
    pub async fn call_subagent(
        &self,
        task: &str,
        max_turns: Option<u32>,
        cancellation: &AgentCancellation,
    ) -> Result<SubagentOutcome, RuntimeError> {
        let dir = self
            .base_path
            .join("subagents")
            .join(uuid::Uuid::new_v4().simple().to_string());
        let mut worker = build_worker(
            self.client.clone(),
            self.log.clone(),
            &self.config,
            &dir,
            task,
            0,
            false,
            cancellation.child(),
        )?;
        let worker_id = worker.id.clone();
        self.log.emit(
            LogCategory::Tournament,
            format!("subagent {worker_id} starting"),
        );

        let cap = max_turns.unwrap_or(self.config.worker_max_turns);
        let result = timeout(
            self.config.worker_timeout,
            worker.core.run_bounded(None, Some(cap)),
        )
        .await;

        let outcome = match result {
            Ok(Ok(record)) => SubagentOutcome {
                worker_id,
                failed: record.reason == CompletionReason::Error,
                completion: Some(record),
                revealed: worker.reveals.lock().unwrap().clone(),
            },
            Ok(Err(e)) => {
                warn!(worker = %worker_id, error = %e, "subagent failed");
                SubagentOutcome {
                    worker_id,
                    completion: None,
                    revealed: worker.reveals.lock().unwrap().clone(),
                    failed: true,
                }
            }
            Err(_) => {
                worker.handle.cancel();
                SubagentOutcome {
                    worker_id,
                    completion: None,
                    revealed: worker.reveals.lock().unwrap().clone(),
                    failed: true,
                }
            }
        };
        Ok(outcome)
    }
}

/// Fold a worker's phase result into a slot plus transcript entries.
fn settle_worker(
    worker: Worker,
    result: PhaseResult,
    transcript: &mut Vec<TranscriptEntry>,
) -> Slot {
    match result {
        Ok(Ok(record)) => {
            let failed = record.reason == CompletionReason::Error;
            if failed {
                transcript.push(TranscriptEntry::WorkerFailed {
                    worker_id: worker.id.clone(),
                    error: record.summary.clone(),
                });
            } else {
                transcript.push(TranscriptEntry::WorkerCompleted {
                    worker_id: worker.id.clone(),
                    reason: record.reason,
                    summary: record.summary.clone(),
                });
            }
            Slot {
                worker,
                completion: Some(record),
                failed,
            }
        }
        Ok(Err(e)) => {
            transcript.push(TranscriptEntry::WorkerFailed {
                worker_id: worker.id.clone(),
                error: e.to_string(),
            });
            Slot {
                worker,
                completion: None,
                failed: true,
            }
        }
        Err(_) => {
            worker.handle.cancel();
            transcript.push(TranscriptEntry::WorkerFailed {
                worker_id: worker.id.clone(),
                error: "safety timeout".to_string(),
            });
            Slot {
                worker,
                completion: None,
                failed: true,
            }
        }
    }
}
