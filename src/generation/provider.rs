//! Language model backends.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::GenerationError;
use crate::config::ModelConfig;
use crate::models::ChatMessage;

/// Incremental completion text, one delta per item.
pub type CompletionStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the backend to constrain output to JSON
    pub json: bool,
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub available: bool,
    pub model: String,
    pub model_loaded: bool,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Single blocking completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;

    /// Streamed completion. Errors before the first byte are returned directly.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, GenerationError>;

    async fn health(&self) -> ProviderHealth;
}

/// Ollama `/api/chat` backend.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Longest NDJSON line accepted from a streamed completion.
const MAX_LINE_BYTES: usize = 1024 * 1024;

impl OllamaProvider {
    pub fn new(config: &ModelConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> ChatBody<'a> {
        ChatBody {
            model: &self.model,
            messages: &request.messages,
            stream,
            format: request.json.then_some("json"),
            options: ModelOptions {
                temperature: request.temperature,
                num_predict: request.num_predict,
            },
        }
    }

    async fn post_chat(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        let mut builder = self.client.post(&url).json(&self.body(request, stream));
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Model backend returned {}: {}", status, body);
            return Err(GenerationError::UpstreamStatus {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        info!(
            "Requesting completion from {} ({} messages)",
            self.model,
            request.messages.len()
        );
        let response = self.post_chat(request, false).await?;
        let chunk: ChatChunk = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Unreachable(e.to_string())
            } else {
                GenerationError::Decode(e.to_string())
            }
        })?;

        if let Some(error) = chunk.error {
            return Err(GenerationError::Backend(error));
        }
        let content = chunk.message.map(|m| m.content).unwrap_or_default();
        info!("Model response length: {}", content.len());
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }
        Ok(content)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, GenerationError> {
        info!(
            "Opening completion stream from {} ({} messages)",
            self.model,
            request.messages.len()
        );
        let response = self.post_chat(request, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(ndjson_deltas(bytes, self.timeout))
    }

    async fn health(&self) -> ProviderHealth {
        let url = format!("{}/api/tags", self.base_url);
        let unavailable = ProviderHealth {
            available: false,
            model: self.model.clone(),
            model_loaded: false,
        };

        let response = match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Model health check returned {}", response.status());
                return unavailable;
            }
            Err(e) => {
                debug!("Model health check failed: {}", e);
                return unavailable;
            }
        };

        let tags: TagsResponse = match response.json().await {
            Ok(tags) => tags,
            Err(_) => return ProviderHealth { available: true, ..unavailable },
        };
        let tagged = format!("{}:", self.model);
        let model_loaded = tags
            .models
            .iter()
            .any(|m| m.name == self.model || m.name.starts_with(&tagged));

        ProviderHealth {
            available: true,
            model: self.model.clone(),
            model_loaded,
        }
    }
}

struct LineState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    idle_timeout: Duration,
    buffer: Vec<u8>,
    eof: bool,
    finished: bool,
}

enum Line {
    Delta(String),
    Skip,
    Done,
}

fn parse_line(line: &[u8]) -> Result<Line, GenerationError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(Line::Skip);
    }
    let chunk: ChatChunk =
        serde_json::from_str(text).map_err(|e| GenerationError::Decode(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(GenerationError::Backend(error));
    }
    if chunk.done {
        return Ok(Line::Done);
    }
    match chunk.message.map(|m| m.content) {
        Some(content) if !content.is_empty() => Ok(Line::Delta(content)),
        _ => Ok(Line::Skip),
    }
}

/// Split a byte stream of newline-delimited JSON chunks into content deltas.
/// The stream fails when upstream stays silent for `idle_timeout` or sends a
/// line longer than `MAX_LINE_BYTES`.
fn ndjson_deltas(
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    idle_timeout: Duration,
) -> CompletionStream {
    let state = LineState {
        bytes,
        idle_timeout,
        buffer: Vec::new(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(Line::Delta(delta)) => return Some((Ok(delta), state)),
                    Ok(Line::Skip) => continue,
                    Ok(Line::Done) => return None,
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }
            if state.eof {
                if state.buffer.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                state.buffer.push(b'\n');
                continue;
            }
            if state.buffer.len() > MAX_LINE_BYTES {
                warn!("Model stream line exceeded {} bytes", MAX_LINE_BYTES);
                state.finished = true;
                let err = GenerationError::Decode(format!(
                    "stream line longer than {} bytes",
                    MAX_LINE_BYTES
                ));
                return Some((Err(err), state));
            }
            match tokio::time::timeout(state.idle_timeout, state.bytes.next()).await {
                Ok(Some(Ok(chunk))) => state.buffer.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    return Some((Err(GenerationError::Unreachable(e.to_string())), state));
                }
                Ok(None) => state.eof = true,
                Err(_) => {
                    warn!("Model stream idle for {:?}", state.idle_timeout);
                    state.finished = true;
                    let err = GenerationError::Unreachable(format!(
                        "no data received for {:?}",
                        state.idle_timeout
                    ));
                    return Some((Err(err), state));
                }
            }
        }
    })
    .boxed()
}
