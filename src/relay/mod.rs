//! Streaming relay: turns model output into the application event stream.
//!
//! A relay writes `connected`, then `chunk`/`progress` events, then exactly
//! one terminal `done` or `error`. Client disconnects and explicit
//! cancellation stop the relay and drop the upstream call; neither is
//! reported as an error. A cancelled relay still closes the stream with
//! `done` so the client can keep its partial content.

#[cfg(test)]
mod accumulator;
mod registry;
mod session;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::generation::prompt::{base_css, base_template, ThemeStage};
use crate::generation::{GenerationError, ThemeGenerator};
use crate::models::{ChatMessage, GeneratedSections, GeneratedTheme, SkinContent};

#[cfg(test)]
pub use accumulator::{AccumulatorState, ChunkMode, StreamAccumulator};
pub use registry::{SessionRegistry, SessionView, SESSION_IDLE_TTL};
pub use session::{CancelHandle, GenerationSession};

/// Events buffered between a relay task and the HTTP response.
pub const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected,
    Chunk { content: String },
    Progress { current: u32, total: u32, message: String },
    Error { error: String },
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// How a relay ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Full content; for the theme pipeline the final JSON snapshot
    Completed(String),
    Cancelled { partial: String },
    Disconnected,
    Failed,
}

/// Write half of an event stream. Enforces the single-terminal-event rule.
pub struct EventSink {
    sender: mpsc::Sender<StreamEvent>,
    terminated: bool,
}

impl EventSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                sender,
                terminated: false,
            },
            receiver,
        )
    }

    /// Returns `false` when the client is gone or a terminal event was already sent.
    pub async fn send(&mut self, event: StreamEvent) -> bool {
        if self.terminated {
            return false;
        }
        let terminal = event.is_terminal();
        if self.sender.send(event).await.is_err() {
            self.terminated = true;
            info!("Client disconnected from AI stream");
            return false;
        }
        if terminal {
            self.terminated = true;
        }
        true
    }

    async fn fail(&mut self, err: &GenerationError) -> RelayOutcome {
        error!("Stream error: {}", err);
        self.send(StreamEvent::Error {
            error: err.to_string(),
        })
        .await;
        RelayOutcome::Failed
    }

    /// Resolves when the receiving side has been dropped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

enum Interrupt<T> {
    Ready(T),
    Cancelled,
    Disconnected,
}

/// Await `fut` unless the call is cancelled or the client goes away first.
async fn interruptible<F: std::future::Future>(
    fut: F,
    sink: &EventSink,
    cancel: &CancelHandle,
) -> Interrupt<F::Output> {
    tokio::select! {
        output = fut => Interrupt::Ready(output),
        _ = cancel.cancelled() => Interrupt::Cancelled,
        _ = sink.closed() => Interrupt::Disconnected,
    }
}

/// Relay a streamed design-chat completion. Chunks carry incremental deltas.
pub async fn relay_chat(
    generator: &ThemeGenerator,
    system_prompt: String,
    history: Vec<ChatMessage>,
    mut sink: EventSink,
    cancel: CancelHandle,
) -> RelayOutcome {
    if !sink.send(StreamEvent::Connected).await {
        return RelayOutcome::Disconnected;
    }
    if cancel.is_cancelled() {
        return cancelled(&mut sink, String::new()).await;
    }

    let mut stream = match interruptible(
        generator.stream_chat(system_prompt, &history),
        &sink,
        &cancel,
    )
    .await
    {
        Interrupt::Ready(Ok(stream)) => stream,
        Interrupt::Ready(Err(e)) => return sink.fail(&e).await,
        Interrupt::Cancelled => return cancelled(&mut sink, String::new()).await,
        Interrupt::Disconnected => return disconnected(),
    };

    let mut received = String::new();
    loop {
        match interruptible(stream.next(), &sink, &cancel).await {
            Interrupt::Ready(Some(Ok(delta))) => {
                received.push_str(&delta);
                if !sink.send(StreamEvent::Chunk { content: delta }).await {
                    return RelayOutcome::Disconnected;
                }
            }
            Interrupt::Ready(Some(Err(e))) => return sink.fail(&e).await,
            Interrupt::Ready(None) => break,
            Interrupt::Cancelled => return cancelled(&mut sink, received).await,
            Interrupt::Disconnected => return disconnected(),
        }
    }

    if received.trim().is_empty() {
        return sink.fail(&GenerationError::EmptyCompletion).await;
    }
    sink.send(StreamEvent::Done).await;
    info!("Chat stream complete ({} chars)", received.len());
    RelayOutcome::Completed(received)
}

/// Two-stage theme pipeline: markup first, then the stylesheet. Each chunk is
/// the complete latest artifact as JSON, emitted only when it changed.
pub async fn relay_theme(
    generator: &ThemeGenerator,
    user_request: String,
    current: SkinContent,
    mut sink: EventSink,
    cancel: CancelHandle,
) -> RelayOutcome {
    if !sink.send(StreamEvent::Connected).await {
        return RelayOutcome::Disconnected;
    }
    if cancel.is_cancelled() {
        return cancelled(&mut sink, String::new()).await;
    }

    let total = ThemeStage::ALL.len() as u32;
    let mut draft = current;
    let mut last_snapshot = String::new();

    for (index, stage) in ThemeStage::ALL.into_iter().enumerate() {
        let progress = StreamEvent::Progress {
            current: index as u32 + 1,
            total,
            message: stage.label().to_string(),
        };
        if !sink.send(progress).await {
            return RelayOutcome::Disconnected;
        }

        draft = match interruptible(
            generator.generate_stage(stage, &user_request, &draft),
            &sink,
            &cancel,
        )
        .await
        {
            Interrupt::Ready(Ok(next)) => next,
            Interrupt::Ready(Err(e)) => return sink.fail(&e).await,
            Interrupt::Cancelled => return cancelled(&mut sink, last_snapshot).await,
            Interrupt::Disconnected => return disconnected(),
        };

        let message = if index + 1 == ThemeStage::ALL.len() {
            format!("\"{}\" theme is ready.", user_request)
        } else {
            format!("{} done.", stage.label())
        };
        let snapshot = match serde_json::to_string(&theme_snapshot(&draft, message)) {
            Ok(json) => json,
            Err(e) => return sink.fail(&GenerationError::Decode(e.to_string())).await,
        };
        if snapshot != last_snapshot {
            if !sink
                .send(StreamEvent::Chunk {
                    content: snapshot.clone(),
                })
                .await
            {
                return RelayOutcome::Disconnected;
            }
            last_snapshot = snapshot;
        }
    }

    sink.send(StreamEvent::Done).await;
    info!("Theme pipeline complete for \"{}\"", user_request);
    RelayOutcome::Completed(last_snapshot)
}

/// Latest known-good artifact of the theme pipeline.
pub fn theme_snapshot(draft: &SkinContent, message: String) -> GeneratedTheme {
    GeneratedTheme {
        message,
        sections: GeneratedSections {
            html_template: Some(base_template(draft)),
            custom_css: base_css(draft).to_string(),
            sections: Default::default(),
        },
    }
}

async fn cancelled(sink: &mut EventSink, partial: String) -> RelayOutcome {
    info!("Generation cancelled ({} chars kept)", partial.len());
    sink.send(StreamEvent::Done).await;
    RelayOutcome::Cancelled { partial }
}

fn disconnected() -> RelayOutcome {
    info!("Client disconnected from AI stream");
    RelayOutcome::Disconnected
}
