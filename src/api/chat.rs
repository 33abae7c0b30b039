//! Conversation endpoints streaming text and audio as server-sent events

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::llm::{ChatMessage, StaticReply};
use crate::pipeline::Turn;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/stream_chat", get(stream_chat))
        .route("/tts", post(tts))
        .with_state(state)
}

/// Conversation so far, newest message last
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub msg: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChatQuery {
    pub text: String,
}

/// Text to voice without consulting the model
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub msg: String,
}

async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if request.msg.is_empty() {
        return Err(ApiError::BadRequest("msg must not be empty".to_string()));
    }

    Ok(sse_response(state.pipeline.start(request.msg)).into_response())
}

async fn stream_chat(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StreamChatQuery>,
) -> Result<Response, ApiError> {
    if query.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let turn = state.pipeline.start(vec![ChatMessage::user(query.text)]);
    Ok(sse_response(turn).into_response())
}

async fn tts(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    if request.msg.trim().is_empty() {
        return Err(ApiError::BadRequest("msg must not be empty".to_string()));
    }

    let reply = Arc::new(StaticReply::new(request.msg));
    Ok(sse_response(state.pipeline.start_with(reply, Vec::new())).into_response())
}

/// Stream a turn's events; the turn is cancelled when the client goes away
fn sse_response(turn: Turn) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::debug!(turn = %turn.id(), "streaming turn");

    let events = turn
        .into_stream()
        .map(|event| Event::default().json_data(event.to_wire()));
    Sse::new(events).keep_alive(KeepAlive::default())
}
