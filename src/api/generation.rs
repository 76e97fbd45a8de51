//! Generation endpoints: one-shot theme generation and the SSE relays.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;
use serde::Serialize;

use super::{success, ApiResult};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::prompt::chat_system_prompt;
use crate::generation::ProviderHealth;
use crate::models::{EditTarget, GenerateRequest, GeneratedTheme, SectionKey, SkinContent};
use crate::relay::{relay_chat, relay_theme, EventSink, SessionView, StreamEvent, EVENT_BUFFER};
use crate::AppState;

/// Model availability as reported to clients.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub health: ProviderHealth,
}

/// Response header naming the session a stream belongs to.
pub const SESSION_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 64;

/// Outcome of a cancel request.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Validated view of a generation request.
struct Prepared {
    session_id: String,
    user_request: String,
    target: EditTarget,
    current: SkinContent,
}

fn prepare(request: &GenerateRequest) -> Result<Prepared, AppError> {
    let user_request = request
        .latest_user_request()
        .ok_or_else(|| AppError::Validation("A user message is required".to_string()))?
        .to_string();

    let session_id = match request.session_id.as_deref() {
        Some(id) => {
            validate_session_id(id)?;
            id.to_string()
        }
        None => Uuid::new_v4().to_string(),
    };

    let target = EditTarget::from_request(request.active_section.as_deref());
    let active: Option<SectionKey> = match target {
        EditTarget::Section(key) => Some(key),
        EditTarget::Unified => None,
    };

    Ok(Prepared {
        session_id,
        user_request,
        target,
        current: request.current_sections(active),
    })
}

fn validate_session_id(id: &str) -> Result<(), AppError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid session id: {:?}", id)))
    }
}

/// POST /api/ai/generate - Generate a theme in one call.
pub async fn generate_theme(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GeneratedTheme>, AppError> {
    let prepared = prepare(&request)?;
    let theme = state
        .generator
        .generate(&prepared.user_request, prepared.target, &prepared.current)
        .await?;
    Ok(Json(theme))
}

/// POST /api/ai/chat/stream - Relay a design chat as server-sent events.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let prepared = prepare(&request)?;
    let system_prompt = chat_system_prompt(
        prepared.target,
        request.current_code.as_deref().unwrap_or_default(),
    );

    let session_id = prepared.session_id;
    let (cancel, history) = state
        .sessions
        .begin(&session_id, prepared.current, &request.messages)
        .await;

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let generator = state.generator.clone();
    let sessions = state.sessions.clone();
    let span = info_span!("chat_stream", session_id = %session_id, stream_id = %Uuid::new_v4());
    let header = [(SESSION_HEADER, session_id.clone())];

    tokio::spawn(
        async move {
            tracing::info!("Chat stream opened ({} turns)", history.len());
            let outcome = relay_chat(&generator, system_prompt, history, sink, cancel.clone()).await;
            sessions.finish(&session_id, &cancel, &outcome).await;
            tracing::debug!("Chat stream finished: {:?}", outcome);
        }
        .instrument(span),
    );

    Ok((header, sse_response(rx)))
}

/// POST /api/ai/theme/stream - Run the two-stage theme pipeline as server-sent events.
pub async fn theme_stream(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Prepared {
        session_id,
        user_request,
        current,
        ..
    } = prepare(&request)?;

    let (cancel, _) = state
        .sessions
        .begin(&session_id, current.clone(), &request.messages)
        .await;

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let generator = state.generator.clone();
    let sessions = state.sessions.clone();
    let span = info_span!("theme_stream", session_id = %session_id, stream_id = %Uuid::new_v4());
    let header = [(SESSION_HEADER, session_id.clone())];

    tokio::spawn(
        async move {
            tracing::info!("Theme stream opened for \"{}\"", user_request);
            let outcome = relay_theme(
                &generator,
                user_request,
                current,
                sink,
                cancel.clone(),
            )
            .await;
            sessions.finish(&session_id, &cancel, &outcome).await;
            tracing::debug!("Theme stream finished: {:?}", outcome);
        }
        .instrument(span),
    );

    Ok((header, sse_response(rx)))
}

/// POST /api/ai/sessions/:session_id/cancel - Stop the session's in-flight call.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<CancelResponse> {
    if state.sessions.view(&session_id).await.is_none() {
        return Err(AppError::NotFound(format!("Session {} not found", session_id)));
    }
    let cancelled = state.sessions.cancel(&session_id).await;
    success(CancelResponse { cancelled })
}

/// GET /api/ai/sessions/:session_id - Turns and status of a session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionView> {
    let view = state
        .sessions
        .view(&session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;
    success(view)
}

/// GET /api/ai/health - Model availability.
pub async fn model_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.generator.health().await;
    Json(HealthResponse {
        status: if health.available { "ok" } else { "unavailable" },
        health,
    })
}

fn sse_response(
    rx: tokio::sync::mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(rx).filter_map(|event| {
        match Event::default().json_data(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                tracing::error!("Failed to encode stream event: {}", e);
                None
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
