//! Consumer side of the event stream: folds events into the content shown to
//! the user.

use super::session::STOPPED_MARKER;
use super::StreamEvent;

/// How `chunk` payloads combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Each chunk is a delta appended to the content
    Incremental,
    /// Each chunk is the complete latest artifact
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorState {
    Streaming,
    Done,
    Failed(String),
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

#[derive(Debug)]
pub struct StreamAccumulator {
    mode: ChunkMode,
    content: String,
    state: AccumulatorState,
    progress: Option<Progress>,
}

impl StreamAccumulator {
    pub fn new(mode: ChunkMode) -> Self {
        Self {
            mode,
            content: String::new(),
            state: AccumulatorState::Streaming,
            progress: None,
        }
    }

    /// Apply one event in receipt order. Returns `false` when the event was
    /// ignored because the stream already reached a terminal state.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        if self.is_finished() {
            return false;
        }
        match event {
            StreamEvent::Connected => {}
            StreamEvent::Chunk { content } => match self.mode {
                ChunkMode::Incremental => self.content.push_str(content),
                ChunkMode::Snapshot => self.content = content.clone(),
            },
            StreamEvent::Progress {
                current,
                total,
                message,
            } => {
                self.progress = Some(Progress {
                    current: *current,
                    total: *total,
                    message: message.clone(),
                });
            }
            StreamEvent::Error { error } => self.state = AccumulatorState::Failed(error.clone()),
            StreamEvent::Done => self.state = AccumulatorState::Done,
        }
        true
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state != AccumulatorState::Streaming
    }

    /// Stop consuming. Partial content is kept and marked as stopped.
    pub fn stop(&mut self) -> &str {
        if self.state == AccumulatorState::Streaming {
            self.state = AccumulatorState::Stopped;
            if self.mode == ChunkMode::Incremental && !self.content.is_empty() {
                self.content.push_str(STOPPED_MARKER);
            }
        }
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(s: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: s.to_string(),
        }
    }

    #[test]
    fn test_incremental_chunks_then_error_keep_partial() {
        let mut acc = StreamAccumulator::new(ChunkMode::Incremental);
        assert!(acc.apply(&StreamEvent::Connected));
        assert!(acc.apply(&chunk("Hello, ")));
        assert!(acc.apply(&chunk("world")));
        assert!(acc.apply(&StreamEvent::Error {
            error: "model crashed".to_string()
        }));

        assert_eq!(acc.content(), "Hello, world");
        assert_eq!(acc.state(), &AccumulatorState::Failed("model crashed".to_string()));
        assert!(!acc.apply(&chunk("late")));
        assert!(!acc.apply(&StreamEvent::Done));
        assert_eq!(acc.content(), "Hello, world");
    }

    #[test]
    fn test_snapshot_chunks_replace_content() {
        let mut acc = StreamAccumulator::new(ChunkMode::Snapshot);
        acc.apply(&StreamEvent::Progress {
            current: 1,
            total: 2,
            message: "html".to_string(),
        });
        acc.apply(&chunk("{\"v\":1}"));
        acc.apply(&chunk("{\"v\":2}"));
        acc.apply(&StreamEvent::Done);

        assert_eq!(acc.content(), "{\"v\":2}");
        assert_eq!(acc.progress().map(|p| p.current), Some(1));
        assert_eq!(acc.state(), &AccumulatorState::Done);
    }

    #[test]
    fn test_stop_marks_partial_content() {
        let mut acc = StreamAccumulator::new(ChunkMode::Incremental);
        acc.apply(&chunk("partial"));
        assert_eq!(acc.stop(), "partial\n\n[stopped]");
        assert_eq!(acc.state(), &AccumulatorState::Stopped);
        assert!(!acc.apply(&chunk("more")));
        assert_eq!(acc.stop(), "partial\n\n[stopped]");
    }

    #[test]
    fn test_stop_after_done_changes_nothing() {
        let mut acc = StreamAccumulator::new(ChunkMode::Incremental);
        acc.apply(&chunk("all"));
        acc.apply(&StreamEvent::Done);
        assert_eq!(acc.stop(), "all");
        assert_eq!(acc.state(), &AccumulatorState::Done);
    }
}
