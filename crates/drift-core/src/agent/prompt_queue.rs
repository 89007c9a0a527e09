//! Operator prompt queue
//!
//! A priority FIFO of messages injected into the agent at turn boundaries.
//! Total order: priority descending, then enqueue sequence ascending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPriority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedPrompt {
    pub id: String,
    pub text: String,
    pub priority: PromptPriority,
    seq: u64,
    pub queued_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PromptQueue {
    items: Mutex<Vec<QueuedPrompt>>,
    next_seq: AtomicU64,
}

impl PromptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, text: impl Into<String>, priority: PromptPriority) -> String {
        let id = format!("prompt_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let prompt = QueuedPrompt {
            id: id.clone(),
            text: text.into(),
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            queued_at: Utc::now(),
        };
        self.items.lock().unwrap().push(prompt);
        id
    }

    /// Remove and return every queued prompt in drain order.
    pub fn drain(&self) -> Vec<QueuedPrompt> {
        let mut items = std::mem::take(&mut *self.items.lock().unwrap());
        items.sort_by_key(drain_key);
        items
    }

    /// Remove a single prompt by id.
    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|p| p.id != id);
        items.len() != before
    }

    /// Current contents in drain order, without consuming them.
    pub fn snapshot(&self) -> Vec<QueuedPrompt> {
        let mut items = self.items.lock().unwrap().clone();
        items.sort_by_key(drain_key);
        items
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

fn drain_key(prompt: &QueuedPrompt) -> (u8, u64) {
    let rank = match prompt.priority {
        PromptPriority::High => 0,
        PromptPriority::Normal => 1,
    };
    (rank, prompt.seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_priority() {
        let queue = PromptQueue::new();
        queue.enqueue("first", PromptPriority::Normal);
        queue.enqueue("second", PromptPriority::Normal);

        let drained = queue.drain();
        assert_eq!(drained[0].text, "first");
        assert_eq!(drained[1].text, "second");
        assert!(queue.is_empty());
    }

    #[test]
    fn high_priority_drains_first_regardless_of_order() {
        let queue = PromptQueue::new();
        for i in 0..5 {
            queue.enqueue(format!("normal {i}"), PromptPriority::Normal);
        }
        queue.enqueue("STOP NOW DRAIN", PromptPriority::High);

        let drained = queue.drain();
        assert_eq!(drained[0].text, "STOP NOW DRAIN");
        assert_eq!(drained[1].text, "normal 0");
        assert_eq!(drained.len(), 6);
    }

    #[test]
    fn remove_by_id() {
        let queue = PromptQueue::new();
        let id = queue.enqueue("target", PromptPriority::Normal);
        queue.enqueue("keep", PromptPriority::Normal);

        assert!(queue.remove(&id));
        assert!(!queue.remove(&id));
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "keep");
    }

    #[test]
    fn snapshot_does_not_consume() {
        let queue = PromptQueue::new();
        queue.enqueue("a", PromptPriority::Normal);
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.len(), 1);
    }
}
