//! Speech recognition endpoints
//!
//! `POST /asr` transcribes one base64 WAV. `GET /asr_ws` accepts a live
//! PCM16 stream, runs voice activity detection per connection and sends a
//! transcript whenever an utterance ends.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ApiError, ApiState};
use crate::pipeline::WireEvent;
use crate::voice::{ListenSession, UtteranceAssembler, decode_base64_payload};
use crate::{Error, Result};

/// Text frames read ahead of the recognizer
const INGEST_BACKLOG: usize = 256;

/// Build ASR router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/asr", post(transcribe))
        .route("/asr_ws", get(ws_upgrade))
        .with_state(state)
}

/// Base64 audio, optionally as a data URL
#[derive(Debug, Deserialize)]
pub struct AsrRequest {
    pub data: String,
}

/// Transcription response; `text` is null when nothing was heard
#[derive(Debug, Serialize)]
pub struct AsrResponse {
    pub text: Option<String>,
}

/// Transcribe one WAV payload
async fn transcribe(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AsrRequest>,
) -> std::result::Result<Json<AsrResponse>, ApiError> {
    let audio = decode_base64_payload(&request.data)?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("empty audio data".to_string()));
    }

    let text = state.transcriber.transcribe(&audio).await?;
    Ok(Json(AsrResponse { text }))
}

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Send transcripts as `{"type":"asr","data":...,"done":true}` frames
    #[serde(default)]
    pub framed: bool,
}

/// Ingest message sent by clients
#[derive(Debug, Deserialize)]
struct IngestMessage {
    #[serde(rename = "type")]
    kind: String,
    data: String,
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.framed))
}

/// Handle one ingest connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, framed: bool) {
    let (sender, receiver) = socket.split();
    serve_ingest(sender, receiver, state, framed).await;
}

/// Run one ingest session over a split connection
///
/// The session (and its detector state) lives exactly as long as the
/// connection. Frames are read on a separate task so a client going away is
/// noticed even while a transcription is in flight; that transcription is
/// then abandoned.
pub async fn serve_ingest<S, R, E>(mut sink: S, stream: R, state: Arc<ApiState>, framed: bool)
where
    S: Sink<Message> + Send + Unpin,
    R: Stream<Item = std::result::Result<Message, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let closed = CancellationToken::new();
    let (frames_tx, mut frames) = mpsc::channel(INGEST_BACKLOG);
    let reader = tokio::spawn(read_frames(stream, frames_tx, closed.clone()));

    let mut session = ListenSession::new(
        state.classifiers.create(),
        &state.vad,
        UtteranceAssembler::new(Arc::clone(&state.transcriber)),
    );

    tracing::info!("ASR stream connected");

    loop {
        let text: Utf8Bytes = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            text = frames.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let ingested = tokio::select! {
            biased;
            () = closed.cancelled() => {
                tracing::info!("ASR stream gone, abandoning transcription");
                break;
            }
            ingested = ingest(&mut session, text.as_str()) => ingested,
        };

        let transcript = match ingested {
            Ok(Some(transcript)) => transcript,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "dropping ingest message");
                continue;
            }
        };

        let outgoing = if framed {
            match serde_json::to_string(&WireEvent::new("asr", transcript.as_str(), true)) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode transcript");
                    continue;
                }
            }
        } else {
            transcript
        };

        if sink.send(Message::Text(outgoing.into())).await.is_err() {
            tracing::info!("ASR stream gone while sending transcript");
            break;
        }
    }

    reader.abort();
    session.reset();
}

/// Forward text frames until the client closes; `closed` fires on exit
async fn read_frames<R, E>(mut stream: R, frames: mpsc::Sender<Utf8Bytes>, closed: CancellationToken)
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let _closed = closed.drop_guard();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if frames.send(text).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("ASR stream closed by client");
                break;
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!(len = data.len(), "received ping");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::info!(error = %e, "ASR stream dropped");
                break;
            }
        }
    }
}

/// Decode one client message and feed its audio to the session
async fn ingest(session: &mut ListenSession, text: &str) -> Result<Option<String>> {
    let message: IngestMessage =
        serde_json::from_str(text).map_err(|e| Error::Decode(format!("bad ingest frame: {e}")))?;

    if message.kind != "asr" {
        tracing::debug!(kind = %message.kind, "ignoring non-audio message");
        return Ok(None);
    }

    let pcm = decode_base64_payload(&message.data)?;
    session.push_pcm(&pcm).await
}
