//! Shared test fixtures for agent, context, and tournament test modules.
//!
//! The loop engine is exercised entirely against a scripted model client so
//! tests stay deterministic and offline. Keeping the script helpers here
//! prevents each test module from rebuilding ad-hoc response plumbing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ai::{ChatRequest, ChatResponse, ModelClient, ModelError, ToolCall};

/// A scripted model client that replays canned results in order.
///
/// When the script runs dry it returns a `complete_task` call so loops under
/// test always terminate.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, ModelError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script individual call results, including hard failures.
    pub fn with_results(results: Vec<Result<ChatResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before answering each call, for pacing-sensitive tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of chat calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests captured in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ChatResponse::calls(vec![complete_task_call(
                "script exhausted",
                "finished",
            )]))
        })
    }
}

/// A model client that always fails with the given error constructor.
pub struct FailingModel {
    make_error: fn() -> ModelError,
}

impl FailingModel {
    pub fn new(make_error: fn() -> ModelError) -> Self {
        Self { make_error }
    }

    pub fn auth() -> Self {
        Self::new(|| ModelError::Auth("invalid key".to_string()))
    }
}

#[async_trait]
impl ModelClient for FailingModel {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ModelError> {
        Err((self.make_error)())
    }
}

static CALL_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_call_id() -> String {
    format!("call_{}", CALL_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Build a tool call with auto-assigned id and a stock description.
pub fn tool_call(name: &str, mut arguments: Value) -> ToolCall {
    if arguments.get("tool_description").is_none() {
        arguments["tool_description"] = Value::String(format!("test call to {name}"));
    }
    ToolCall {
        id: next_call_id(),
        name: name.to_string(),
        arguments,
    }
}

/// A `complete_task` call with the given summary and reason.
pub fn complete_task_call(summary: &str, reason: &str) -> ToolCall {
    tool_call(
        "complete_task",
        json!({"reason": reason, "summary": summary}),
    )
}

/// A `write_file` call for workspace scenarios.
pub fn write_file_call(path: &str, content: &str) -> ToolCall {
    tool_call("write_file", json!({"path": path, "content": content}))
}

/// A `reveal` call for tournament scenarios.
pub fn reveal_call(filename: &str, description: &str) -> ToolCall {
    tool_call(
        "reveal",
        json!({"filename": filename, "description": description}),
    )
}
