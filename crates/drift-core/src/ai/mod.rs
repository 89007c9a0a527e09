//! Model gateway abstraction
//!
//! The runtime only depends on the `ModelClient` trait; the HTTP client is
//! one implementation of it.

pub mod client;
pub mod types;

pub use client::{
    estimate_message_tokens, estimate_tokens, ChatRequest, HttpModelClient, ModelClient,
    ModelError, RetryPolicy,
};
pub use types::{AdvertisedTool, ChatResponse, Message, Role, ToolCall, Usage};
