//! Model gateway client
//!
//! Speaks the OpenAI-compatible chat/completions shape over HTTP. Transient
//! failures (rate limits, 5xx, transport) are retried transparently with
//! exponential backoff; auth failures and malformed responses are terminal.
//! The client never mutates messages and never interprets tool calls; it only
//! decodes them.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ai::types::{AdvertisedTool, ChatResponse, Message, ToolCall, Usage};
use crate::constants::{context, timeouts};

/// Errors surfaced by a model client.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Rate limited by the gateway; retried transparently.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network-level failure; retried transparently.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the gateway.
    #[error("gateway error {status}: {message}")]
    Http { status: u16, message: String },

    /// Authentication rejected. Fatal.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response body did not match the expected shape. Fatal after retries.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ModelError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModelError::Auth(_) | ModelError::Malformed(_))
    }

    /// Transient errors are worth retrying; everything else ends the call.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } | ModelError::Transport(_) => true,
            ModelError::Http { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            ModelError::Auth(_) | ModelError::Malformed(_) => false,
        }
    }

    /// Server-provided wait hint, when the gateway sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Backoff policy for transient gateway errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Random jitter keeps parallel workers from retrying in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error; used by tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }
}

/// Drive a chat call to completion through the backoff policy.
///
/// Doubles the wait on each transient failure, capped by the policy, and
/// defers to a server-provided Retry-After hint when present.
async fn retry_transient<F, Fut>(policy: &RetryPolicy, call: F) -> Result<ChatResponse, ModelError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<ChatResponse, ModelError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        let error = match call().await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_transient() && attempt < policy.max_retries => e,
            Err(e) => return Err(e),
        };

        let mut wait = error.retry_after().unwrap_or(backoff);
        if policy.jitter {
            wait += Duration::from_millis(rand::thread_rng().gen_range(0..500));
        }
        warn!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            wait_ms = wait.as_millis() as u64,
            "transient gateway error, retrying: {error}"
        );

        tokio::time::sleep(wait).await;
        attempt += 1;
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}

/// Parse a Retry-After header: either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    date.duration_since(std::time::SystemTime::now()).ok()
}

/// A single chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<AdvertisedTool>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Abstract request/response interface to an LLM.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError>;

    /// Heuristic token estimate for budgeting; roughly 4 characters/token.
    fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Text-only completion without tools. Used by the summarizer.
    async fn simple_completion(
        &self,
        system: &str,
        prompt: &str,
        model: &str,
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![Message::system(system), Message::user(prompt)],
            tools: Vec::new(),
            temperature: 0.2,
            max_tokens,
        };
        let response = self.chat(request).await?;
        Ok(response.content.unwrap_or_default())
    }
}

/// Heuristic token count: ~4 characters per token with a floor of 1 for
/// non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        (text.len() / 4).max(1)
    }
}

/// Estimate tokens for a full message including tool-call payloads plus a
/// fixed per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = estimate_tokens(&message.content);
    for call in &message.tool_calls {
        total += estimate_tokens(&call.name);
        total += estimate_tokens(&call.arguments.to_string());
    }
    total + context::MESSAGE_OVERHEAD
}

/// HTTP client for an OpenAI-compatible chat/completions gateway.
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    total_tokens: AtomicU64,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeouts::MODEL_CALL)
            .build()
            .expect("reqwest client construction is infallible with static options");
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cumulative tokens reported by the gateway across all calls.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    fn build_payload(request: &ChatRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages.iter().map(encode_message).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            payload["tool_choice"] = Value::String("auto".to_string());
        }
        payload
    }

    async fn send_once(&self, payload: &Value) -> Result<ChatResponse, ModelError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Auth(body));
        }
        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ModelError::RateLimited { retry_after });
        }
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Http { status, message });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        parse_chat_response(&body)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        let payload = Self::build_payload(&request);
        debug!(model = %request.model, messages = request.messages.len(), "model call");

        let response = retry_transient(&self.retry, || self.send_once(&payload)).await?;
        self.total_tokens
            .fetch_add(response.usage.total_tokens, Ordering::Relaxed);
        Ok(response)
    }
}

fn encode_message(message: &Message) -> Value {
    let mut encoded = json!({
        "role": message.role,
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        encoded["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &message.tool_call_id {
        encoded["tool_call_id"] = Value::String(id.clone());
    }
    encoded
}

/// Decode a chat/completions response body into a `ChatResponse`.
pub fn parse_chat_response(body: &Value) -> Result<ChatResponse, ModelError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| ModelError::Malformed("missing choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ModelError::Malformed("missing message".to_string()))?;

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| ModelError::Malformed("tool call missing function".to_string()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| ModelError::Malformed("tool call missing name".to_string()))?
                .to_string();
            let raw_args = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let arguments: Value = serde_json::from_str(raw_args).map_err(|e| {
                ModelError::Malformed(format!("undecodable arguments for '{name}': {e}"))
            })?;
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name,
                arguments,
            });
        }
    }

    let usage: Usage = body
        .get("usage")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ModelError::Malformed(format!("bad usage block: {e}")))?
        .unwrap_or_default();

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(String::from),
        tool_calls,
        usage,
        model: body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            jitter: false,
        }
    }

    #[test]
    fn estimate_has_floor() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn message_estimate_includes_overhead() {
        let msg = Message::user("x".repeat(40));
        assert_eq!(estimate_message_tokens(&msg), 10 + context::MESSAGE_OVERHEAD);
    }

    #[test]
    fn transience_by_error_kind() {
        assert!(ModelError::RateLimited { retry_after: None }.is_transient());
        assert!(ModelError::Transport("reset".into()).is_transient());
        assert!(ModelError::Http { status: 503, message: String::new() }.is_transient());
        assert!(!ModelError::Http { status: 400, message: String::new() }.is_transient());
        assert!(!ModelError::Auth("bad key".into()).is_transient());
        assert!(!ModelError::Malformed("garbage".into()).is_transient());
    }

    #[tokio::test]
    async fn transient_errors_retried_until_success() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient(&fast_policy(3), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ModelError::Transport("connection reset".to_string()))
            } else {
                Ok(ChatResponse::text("recovered"))
            }
        })
        .await;

        assert_eq!(result.unwrap().content.as_deref(), Some("recovered"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_fail_on_first_attempt() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient(&fast_policy(5), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::Auth("invalid key".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ModelError::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_exhausts_with_last_error() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient(&fast_policy(2), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(ModelError::Http { status: 502, .. })));
        // First attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_after_hint_preferred_over_backoff() {
        let attempts = AtomicU32::new(0);
        let start = std::time::Instant::now();

        let result = retry_transient(&fast_policy(1), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ModelError::RateLimited {
                    retry_after: Some(Duration::from_millis(30)),
                })
            } else {
                Ok(ChatResponse::text("ok"))
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("0"), Some(Duration::from_secs(0)));
        assert_eq!(parse_retry_after("nonsense"), None);
    }

    #[test]
    fn parse_text_response() {
        let body = json!({
            "model": "test-model",
            "choices": [{
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        });
        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.usage.total_tokens, 12);
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn parse_tool_call_response() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "write_file",
                            "arguments": "{\"path\":\"a.txt\",\"content\":\"hi\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let response = parse_chat_response(&body).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "write_file");
        assert_eq!(response.tool_calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn malformed_arguments_rejected() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "write_file", "arguments": "not json"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        assert!(matches!(
            parse_chat_response(&body),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn missing_choices_is_malformed() {
        assert!(matches!(
            parse_chat_response(&json!({})),
            Err(ModelError::Malformed(_))
        ));
    }
}
