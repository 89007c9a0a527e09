//! Status publish/subscribe
//!
//! Broadcasts agent status snapshots to external observers. Identical
//! adjacent snapshots are coalesced; slow subscribers may miss intermediates
//! but the retained latest snapshot is always available.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent::prompt_queue::QueuedPrompt;
use crate::constants::observability;

/// A structured view of an agent's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub loop_count: u64,
    pub total_tokens: u64,
    pub last_action: Option<String>,
    pub context_usage_percent: f64,
    pub queued_prompts: Vec<QueuedPrompt>,
    pub todos_digest: Option<String>,
}

pub struct StatusBus {
    tx: broadcast::Sender<StatusSnapshot>,
    latest: Mutex<Option<StatusSnapshot>>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(observability::STATUS_CAPACITY)
    }
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: Mutex::new(None),
        }
    }

    /// Broadcast a snapshot unless it repeats the previous one exactly.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        let mut latest = self.latest.lock().unwrap();
        if latest.as_ref() == Some(&snapshot) {
            return;
        }
        *latest = Some(snapshot.clone());
        // No receivers is fine; the latest snapshot stays queryable.
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<StatusSnapshot> {
        self.latest.lock().unwrap().clone()
    }
}
