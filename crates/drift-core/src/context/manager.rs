//! Context window manager
//!
//! Tracks messages and estimated token usage for one agent, and performs
//! summarizing compaction when the configured threshold is crossed. Single
//! writer: the owning agent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::ai::{estimate_message_tokens, Message, ModelClient, Role};
use crate::constants::{context, model};
use crate::context::summarizer::{build_summary_prompt, SUMMARIZER_SYSTEM_PROMPT};
use crate::error::RuntimeError;

/// Point-in-time view of context usage, fed to status snapshots and the
/// `manage_context` tool.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub estimated_tokens: usize,
    pub max_tokens: usize,
    pub usage_percent: f64,
    pub threshold: f64,
    pub needs_compaction: bool,
    pub message_count: usize,
    pub compaction_count: u32,
}

pub struct ContextManager {
    messages: Vec<Message>,
    system_prompt: String,
    estimated_tokens: usize,
    max_tokens: usize,
    threshold: f64,
    preserve_recent: usize,
    compaction_count: u32,
    last_compacted_at: Option<DateTime<Utc>>,
}

impl ContextManager {
    pub fn new(max_tokens: usize, threshold: f64) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: String::new(),
            estimated_tokens: 0,
            max_tokens,
            threshold,
            preserve_recent: context::PRESERVE_RECENT,
            compaction_count: 0,
            last_compacted_at: None,
        }
    }

    /// Set or replace the system prompt, keeping it as the first message.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = self.system_prompt.clone();
            }
            _ => {
                self.messages
                    .insert(0, Message::system(self.system_prompt.clone()));
            }
        }
        self.recompute_estimate();
    }

    /// Append a message; the estimate only grows between compactions.
    pub fn append(&mut self, message: Message) {
        self.estimated_tokens += estimate_message_tokens(&message);
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    pub fn usage_percent(&self) -> f64 {
        if self.max_tokens == 0 {
            return 1.0;
        }
        self.estimated_tokens as f64 / self.max_tokens as f64
    }

    pub fn should_compact(&self) -> bool {
        self.usage_percent() >= self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn compaction_count(&self) -> u32 {
        self.compaction_count
    }

    pub fn last_compacted_at(&self) -> Option<DateTime<Utc>> {
        self.last_compacted_at
    }

    /// Adjust the compaction threshold within the accepted band.
    pub fn set_threshold(&mut self, threshold: f64) -> Result<(), RuntimeError> {
        if !(context::MIN_THRESHOLD..=context::MAX_THRESHOLD).contains(&threshold) {
            return Err(RuntimeError::ThresholdRange(threshold));
        }
        self.threshold = threshold;
        Ok(())
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            estimated_tokens: self.estimated_tokens,
            max_tokens: self.max_tokens,
            usage_percent: self.usage_percent(),
            threshold: self.threshold,
            needs_compaction: self.should_compact(),
            message_count: self.messages.len(),
            compaction_count: self.compaction_count,
        }
    }

    /// Drop everything but the system prompt.
    pub fn reset(&mut self) {
        self.messages.clear();
        if !self.system_prompt.is_empty() {
            self.messages.push(Message::system(self.system_prompt.clone()));
        }
        self.recompute_estimate();
    }

    /// Summarize older messages into a single synthetic system message.
    ///
    /// The latest `preserve_recent` messages survive verbatim; the summary is
    /// inserted at the position of the first dropped message. On any failure
    /// the context is left untouched and `CompactionFailed` is returned.
    pub async fn compact(
        &mut self,
        client: &dyn ModelClient,
        summarizer_model: &str,
    ) -> Result<String, RuntimeError> {
        let start = usize::from(matches!(
            self.messages.first(),
            Some(m) if m.role == Role::System
        ));
        let end = self.messages.len().saturating_sub(self.preserve_recent);
        if end <= start {
            return Err(RuntimeError::CompactionFailed(
                "too few messages to compact".to_string(),
            ));
        }

        let prompt = build_summary_prompt(&self.messages[start..end]);
        let summary = client
            .simple_completion(
                SUMMARIZER_SYSTEM_PROMPT,
                &prompt,
                summarizer_model,
                model::SUMMARY_MAX_TOKENS,
            )
            .await
            .map_err(|e| RuntimeError::CompactionFailed(e.to_string()))?;
        if summary.trim().is_empty() {
            return Err(RuntimeError::CompactionFailed(
                "summarizer returned an empty summary".to_string(),
            ));
        }

        let dropped = end - start;
        let synthetic = Message::system(format!(
            "[CONTEXT SUMMARY #{}]\n\n{}",
            self.compaction_count + 1,
            summary
        ));
        self.messages.splice(start..end, std::iter::once(synthetic));
        self.compaction_count += 1;
        self.last_compacted_at = Some(Utc::now());
        self.recompute_estimate();

        info!(
            dropped,
            compaction_count = self.compaction_count,
            estimated_tokens = self.estimated_tokens,
            "context compacted"
        );
        Ok(summary)
    }

    fn recompute_estimate(&mut self) {
        self.estimated_tokens = self.messages.iter().map(estimate_message_tokens).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatResponse;
    use crate::testsupport::ScriptedModel;

    fn seeded(max_tokens: usize, threshold: f64, filler_messages: usize) -> ContextManager {
        let mut ctx = ContextManager::new(max_tokens, threshold);
        ctx.set_system_prompt("You are a test agent. Goal: write greet.txt");
        for i in 0..filler_messages {
            ctx.append(Message::user(format!("filler message {i}: {}", "x".repeat(120))));
        }
        ctx
    }

    #[test]
    fn estimate_grows_monotonically_between_compactions() {
        let mut ctx = ContextManager::new(1000, 0.9);
        let mut previous = ctx.estimated_tokens();
        for i in 0..10 {
            ctx.append(Message::user(format!("message {i}")));
            assert!(ctx.estimated_tokens() >= previous);
            previous = ctx.estimated_tokens();
        }
    }

    #[test]
    fn threshold_band_enforced() {
        let mut ctx = ContextManager::new(1000, 0.85);
        assert!(matches!(
            ctx.set_threshold(0.05),
            Err(RuntimeError::ThresholdRange(_))
        ));
        assert!(matches!(
            ctx.set_threshold(1.0),
            Err(RuntimeError::ThresholdRange(_))
        ));
        ctx.set_threshold(0.5).unwrap();
        assert_eq!(ctx.threshold(), 0.5);
    }

    #[test]
    fn should_compact_at_threshold() {
        let mut ctx = ContextManager::new(100, 0.5);
        assert!(!ctx.should_compact());
        ctx.append(Message::user("x".repeat(200)));
        assert!(ctx.should_compact());
    }

    #[test]
    fn system_prompt_stays_first() {
        let mut ctx = ContextManager::new(1000, 0.9);
        ctx.append(Message::user("hello"));
        ctx.set_system_prompt("prompt v1");
        ctx.set_system_prompt("prompt v2");
        assert_eq!(ctx.messages()[0].role, Role::System);
        assert_eq!(ctx.messages()[0].content, "prompt v2");
        assert_eq!(ctx.messages().len(), 2);
    }

    #[tokio::test]
    async fn compaction_brings_usage_under_threshold() {
        // Seed roughly 520 tokens of a 1000-token window at a 0.5 threshold.
        let mut ctx = seeded(1000, 0.5, 15);
        assert!(ctx.should_compact());

        let client = ScriptedModel::new(vec![ChatResponse::text(
            "The agent's goal is to write greet.txt. Nothing else happened.",
        )]);
        let summary = ctx.compact(&client, "summarizer-model").await.unwrap();

        assert!(ctx.usage_percent() < 0.5);
        assert!(summary.contains("greet.txt"));
        assert_eq!(ctx.compaction_count(), 1);
        // The synthetic summary sits where the first dropped message was.
        assert_eq!(ctx.messages()[0].role, Role::System);
        assert!(ctx.messages()[1].content.starts_with("[CONTEXT SUMMARY #1]"));
        assert!(ctx.messages()[1].content.contains("greet.txt"));
    }

    #[tokio::test]
    async fn retained_tail_survives_verbatim() {
        let mut ctx = seeded(1000, 0.5, 15);
        let tail: Vec<Message> = ctx.messages()[ctx.messages().len() - 4..].to_vec();

        let client = ScriptedModel::new(vec![ChatResponse::text("summary")]);
        ctx.compact(&client, "summarizer-model").await.unwrap();

        let kept = &ctx.messages()[ctx.messages().len() - 4..];
        assert_eq!(kept, tail.as_slice());
    }

    #[tokio::test]
    async fn failed_compaction_leaves_context_untouched() {
        let mut ctx = seeded(1000, 0.5, 15);
        let before = ctx.messages().to_vec();
        let before_estimate = ctx.estimated_tokens();

        let client = crate::testsupport::FailingModel::new(|| {
            crate::ai::ModelError::Transport("connection reset".to_string())
        });
        let result = ctx.compact(&client, "summarizer-model").await;

        assert!(matches!(result, Err(RuntimeError::CompactionFailed(_))));
        assert_eq!(ctx.messages(), before.as_slice());
        assert_eq!(ctx.estimated_tokens(), before_estimate);
        assert_eq!(ctx.compaction_count(), 0);
    }

    #[tokio::test]
    async fn compaction_refuses_when_nothing_to_drop() {
        let mut ctx = seeded(1000, 0.5, 2);
        let client = ScriptedModel::new(vec![ChatResponse::text("summary")]);
        assert!(matches!(
            ctx.compact(&client, "summarizer-model").await,
            Err(RuntimeError::CompactionFailed(_))
        ));
    }

    #[test]
    fn reset_keeps_system_prompt() {
        let mut ctx = seeded(1000, 0.5, 5);
        ctx.reset();
        assert_eq!(ctx.messages().len(), 1);
        assert_eq!(ctx.messages()[0].role, Role::System);
    }
}
