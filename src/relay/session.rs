//! Per-conversation state and cooperative cancellation.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::RelayOutcome;
use crate::generation::prompt::trim_history;
use crate::models::{ChatMessage, SkinContent};

/// Appended to partial content kept after a cancelled generation.
pub const STOPPED_MARKER: &str = "\n\n[stopped]";

/// Cancellation signal shared between a session and its in-flight relay.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Whether both handles belong to the same model call.
    pub fn same_call(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.sender, &other.sender)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Ordered turns, the template snapshot they refer to, and at most one
/// in-flight model call.
#[derive(Debug)]
pub struct GenerationSession {
    turns: Vec<ChatMessage>,
    snapshot: SkinContent,
    history_limit: usize,
    in_flight: Option<CancelHandle>,
}

impl GenerationSession {
    pub fn new(snapshot: SkinContent, history_limit: usize) -> Self {
        Self {
            turns: Vec::new(),
            snapshot,
            history_limit,
            in_flight: None,
        }
    }

    /// Replace the turns with client-held history.
    pub fn reset_turns(&mut self, history: &[ChatMessage]) {
        self.turns = trim_history(history, self.history_limit);
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn snapshot(&self) -> &SkinContent {
        &self.snapshot
    }

    pub fn set_snapshot(&mut self, snapshot: SkinContent) {
        self.snapshot = snapshot;
    }

    pub fn push_turn(&mut self, message: ChatMessage) {
        self.turns.push(message);
        self.turns = trim_history(&self.turns, self.history_limit);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start a model call. Any call still in flight is cancelled first.
    pub fn begin(&mut self) -> CancelHandle {
        if let Some(previous) = self.in_flight.take() {
            info!("Superseding in-flight generation");
            previous.cancel();
        }
        let handle = CancelHandle::new();
        self.in_flight = Some(handle.clone());
        handle
    }

    /// Signal the in-flight call to stop. The call stays in flight until its
    /// relay reports back through [`finish`](Self::finish).
    pub fn cancel(&self) -> bool {
        match &self.in_flight {
            Some(handle) if !handle.is_cancelled() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Record the assistant side of a finished call. Outcomes of superseded
    /// calls are dropped.
    pub fn finish(&mut self, handle: &CancelHandle, outcome: &RelayOutcome) -> bool {
        if !self.in_flight.as_ref().is_some_and(|h| h.same_call(handle)) {
            return false;
        }
        self.in_flight = None;
        match outcome {
            RelayOutcome::Completed(content) => {
                self.push_turn(ChatMessage::assistant(content.clone()));
            }
            RelayOutcome::Cancelled { partial } if !partial.is_empty() => {
                self.push_turn(ChatMessage::assistant(format!("{}{}", partial, STOPPED_MARKER)));
            }
            _ => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!handle.is_cancelled());
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter woke up")
            .unwrap();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_begin_supersedes_previous_call() {
        let mut session = GenerationSession::new(SkinContent::default(), 10);
        let first = session.begin();
        let second = session.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(session.is_busy());

        assert!(session.cancel());
        assert!(second.is_cancelled());
        assert!(!session.cancel());
        assert!(session.is_busy());

        assert!(!session.finish(&first, &RelayOutcome::Completed("late".to_string())));
        assert!(session.turns().is_empty());
        assert!(session.finish(&second, &RelayOutcome::Disconnected));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = GenerationSession::new(SkinContent::default(), 3);
        for i in 0..5 {
            session.push_turn(ChatMessage::user(i.to_string()));
        }
        let contents: Vec<&str> = session.turns().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_finish_records_stopped_partial() {
        let mut session = GenerationSession::new(SkinContent::default(), 10);
        let handle = session.begin();
        session.finish(
            &handle,
            &RelayOutcome::Cancelled {
                partial: "half a sent".to_string(),
            },
        );
        assert!(!session.is_busy());
        assert_eq!(
            session.turns().last().map(|m| m.content.as_str()),
            Some("half a sent\n\n[stopped]")
        );

        let handle = session.begin();
        session.finish(&handle, &RelayOutcome::Failed);
        assert_eq!(session.turns().len(), 1);
    }
}
