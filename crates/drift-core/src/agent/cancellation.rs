//! Cooperative cancellation
//!
//! Wraps a `CancellationToken` tree: the lifecycle controller cancels the
//! root, tournament workers get child tokens so one worker's cancellation
//! never touches its siblings.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct AgentCancellation {
    token: CancellationToken,
}

impl AgentCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child that is cancelled with this token but can also be cancelled
    /// independently.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_cancelled_with_parent() {
        let parent = AgentCancellation::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_leaves_parent_and_siblings() {
        let parent = AgentCancellation::new();
        let a = parent.child();
        let b = parent.child();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
