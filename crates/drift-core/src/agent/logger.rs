//! Structured event log
//!
//! An append-only ring buffer of categorized entries backing the
//! observability plane. Tool entries carry the model's `tool_description` as
//! the entry description; the displayed arguments never include it. Every
//! emit is mirrored to `tracing`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::constants::observability;
use crate::tools::registry::DESCRIPTION_FIELD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Lifecycle,
    Llm,
    Tool,
    Context,
    Tournament,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
}

/// Size-bounded event log with FIFO eviction.
pub struct EventLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    counter: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(observability::LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            counter: AtomicU64::new(0),
        }
    }

    /// Emit a plain entry.
    pub fn emit(&self, category: LogCategory, message: impl Into<String>) {
        self.push(category, message.into(), None, None, None);
    }

    /// Emit an entry with a free-text description.
    pub fn emit_described(
        &self,
        category: LogCategory,
        message: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.push(category, message.into(), Some(description.into()), None, None);
    }

    /// Emit a tool-call entry.
    ///
    /// A `tool_description` still present in `args` is removed and used as
    /// the entry description when none was supplied.
    pub fn emit_tool(
        &self,
        tool_name: &str,
        mut args: Value,
        description: Option<String>,
        message: impl Into<String>,
    ) {
        let stripped = args
            .as_object_mut()
            .and_then(|o| o.remove(DESCRIPTION_FIELD))
            .and_then(|v| v.as_str().map(String::from));
        self.push(
            LogCategory::Tool,
            message.into(),
            description.or(stripped),
            Some(tool_name.to_string()),
            Some(args),
        );
    }

    pub fn emit_error(&self, message: impl Into<String>, cause: impl std::fmt::Display) {
        self.push(
            LogCategory::Error,
            message.into(),
            Some(cause.to_string()),
            None,
            None,
        );
    }

    fn push(
        &self,
        category: LogCategory,
        message: String,
        description: Option<String>,
        tool_name: Option<String>,
        tool_args: Option<Value>,
    ) {
        match category {
            LogCategory::Error => {
                tracing::error!(?category, description = description.as_deref(), "{message}")
            }
            _ => tracing::info!(?category, description = description.as_deref(), "{message}"),
        }

        let entry = LogEntry {
            id: self.counter.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            category,
            message,
            description,
            tool_name,
            tool_args,
        };

        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries first, optionally filtered by category.
    pub fn tail(&self, limit: usize, category: Option<LogCategory>) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .rev()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_description_redacted_from_args() {
        let log = EventLog::new(10);
        log.emit_tool(
            "write_file",
            json!({"path": "a.txt", "tool_description": "writing the plan"}),
            None,
            "tool call: write_file",
        );

        let entries = log.tail(10, Some(LogCategory::Tool));
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.description.as_deref(), Some("writing the plan"));
        assert!(entry.tool_args.as_ref().unwrap().get(DESCRIPTION_FIELD).is_none());
        assert_eq!(entry.tool_args.as_ref().unwrap()["path"], "a.txt");
    }

    #[test]
    fn explicit_description_wins() {
        let log = EventLog::new(10);
        log.emit_tool(
            "echo",
            json!({"tool_description": "from args"}),
            Some("explicit".to_string()),
            "tool call: echo",
        );
        assert_eq!(
            log.tail(1, None)[0].description.as_deref(),
            Some("explicit")
        );
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.emit(LogCategory::Lifecycle, format!("entry {i}"));
        }
        assert_eq!(log.len(), 3);
        let entries = log.tail(10, None);
        assert_eq!(entries[0].message, "entry 4");
        assert_eq!(entries[2].message, "entry 2");
    }

    #[test]
    fn tail_filters_by_category() {
        let log = EventLog::new(10);
        log.emit(LogCategory::Llm, "model reply");
        log.emit(LogCategory::Context, "compacted");
        log.emit(LogCategory::Llm, "another reply");

        let llm = log.tail(10, Some(LogCategory::Llm));
        assert_eq!(llm.len(), 2);
        assert!(llm.iter().all(|e| e.category == LogCategory::Llm));
    }
}
