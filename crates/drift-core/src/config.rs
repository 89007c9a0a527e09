//! Runtime configuration
//!
//! Loaded from a TOML file with per-field defaults, validated at startup.
//! The gateway API key comes from the environment (`DRIFT_API_KEY`) rather
//! than the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{context, model, timeouts, tournament};
use crate::error::RuntimeError;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub tournament: TournamentSettings,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Model identifiers and gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_main_model")]
    pub main: String,
    /// Model used for compaction summaries; falls back to `main` when unset.
    #[serde(default)]
    pub summarizer: Option<String>,
    /// Model used by tournament workers; falls back to `main` when unset.
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            main: default_main_model(),
            summarizer: None,
            worker: None,
            base_url: default_base_url(),
        }
    }
}

impl ModelConfig {
    pub fn summarizer_model(&self) -> &str {
        self.summarizer.as_deref().unwrap_or(&self.main)
    }

    pub fn worker_model(&self) -> &str {
        self.worker.as_deref().unwrap_or(&self.main)
    }
}

/// Context window budget and compaction trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_threshold")]
    pub compaction_threshold: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            compaction_threshold: default_threshold(),
        }
    }
}

/// Loop behavior of the main agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_true")]
    pub enable_code_execution: bool,
    #[serde(default = "default_code_timeout")]
    pub code_timeout_seconds: u64,
    /// Turn cap; `None` runs unbounded.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Wall-clock cap for a task-scoped run; `None` runs unbounded.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Continuous mode keeps looping after `complete_task` closes a
    /// sub-task; task-scoped mode terminates on it.
    #[serde(default = "default_true")]
    pub continuous: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_response_tokens")]
    pub max_response_tokens: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enable_code_execution: true,
            code_timeout_seconds: default_code_timeout(),
            max_turns: None,
            timeout_seconds: None,
            continuous: true,
            temperature: default_temperature(),
            max_response_tokens: default_response_tokens(),
        }
    }
}

/// Tournament funnel defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSettings {
    #[serde(default = "default_stages")]
    pub default_stages: Vec<usize>,
    #[serde(default = "default_debate_rounds")]
    pub default_debate_rounds: u32,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_worker_max_turns")]
    pub worker_max_turns: u32,
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,
}

impl Default for TournamentSettings {
    fn default() -> Self {
        Self {
            default_stages: default_stages(),
            default_debate_rounds: default_debate_rounds(),
            max_parallel: default_max_parallel(),
            worker_max_turns: default_worker_max_turns(),
            worker_timeout_seconds: default_worker_timeout(),
        }
    }
}

/// Filesystem sandbox root under which all agent workspaces live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RuntimeError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let t = self.context.compaction_threshold;
        if !(context::MIN_THRESHOLD..=context::MAX_THRESHOLD).contains(&t) {
            return Err(RuntimeError::ThresholdRange(t));
        }
        validate_stages(&self.tournament.default_stages)?;
        Ok(())
    }

    /// Default configuration rendered as TOML, for `drift config`.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Stage widths must each be at least 1 and never grow between stages.
pub fn validate_stages(stages: &[usize]) -> Result<(), RuntimeError> {
    let narrowing = !stages.is_empty()
        && stages.iter().all(|&n| n >= 1)
        && stages.windows(2).all(|w| w[0] >= w[1]);
    if narrowing {
        Ok(())
    } else {
        Err(RuntimeError::InvalidStages(stages.to_vec()))
    }
}

fn default_main_model() -> String {
    "x-ai/grok-4.1-fast".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_max_tokens() -> usize {
    context::DEFAULT_MAX_TOKENS
}

fn default_threshold() -> f64 {
    context::DEFAULT_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn default_code_timeout() -> u64 {
    timeouts::CODE_EXECUTION.as_secs()
}

fn default_temperature() -> f32 {
    model::TEMPERATURE
}

fn default_response_tokens() -> usize {
    model::MAX_RESPONSE_TOKENS
}

fn default_stages() -> Vec<usize> {
    tournament::DEFAULT_STAGES.to_vec()
}

fn default_debate_rounds() -> u32 {
    tournament::DEFAULT_DEBATE_ROUNDS
}

fn default_max_parallel() -> usize {
    tournament::MAX_PARALLEL
}

fn default_worker_max_turns() -> u32 {
    tournament::WORKER_MAX_TURNS
}

fn default_worker_timeout() -> u64 {
    timeouts::WORKER_SAFETY.as_secs()
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("sandbox")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RuntimeConfig::default().validate().unwrap();
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = RuntimeConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.context.max_tokens, config.context.max_tokens);
        assert_eq!(parsed.tournament.default_stages, config.tournament.default_stages);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: RuntimeConfig = toml::from_str(
            r#"
            [context]
            max_tokens = 1000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.context.max_tokens, 1000);
        assert_eq!(parsed.context.compaction_threshold, default_threshold());
        assert!(parsed.agent.continuous);
    }

    #[test]
    fn widening_stages_rejected() {
        assert!(matches!(
            validate_stages(&[2, 3]),
            Err(RuntimeError::InvalidStages(_))
        ));
        assert!(matches!(
            validate_stages(&[3, 0]),
            Err(RuntimeError::InvalidStages(_))
        ));
        assert!(matches!(
            validate_stages(&[]),
            Err(RuntimeError::InvalidStages(_))
        ));
        validate_stages(&[4, 3, 2]).unwrap();
        validate_stages(&[2, 2, 1]).unwrap();
    }

    #[test]
    fn out_of_band_threshold_rejected() {
        let mut config = RuntimeConfig::default();
        config.context.compaction_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::ThresholdRange(_))
        ));
    }
}
