//! HTTP API server for the Murmur gateway

pub mod asr;
pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerConfig, VadConfig};
use crate::error::ErrorKind;
use crate::llm::{ChatCompletionsClient, LanguageModel};
use crate::pipeline::{EmotionTable, SentenceSegmenter, TurnPipeline, observer_for};
use crate::voice::{
    ClassifierFactory, SpeechToText, Synthesizer, TextToSpeech, Transcriber,
    energy_classifier_factory,
};
use crate::Result;

/// Shared state for API handlers
pub struct ApiState {
    /// Starts conversation turns
    pub pipeline: TurnPipeline,

    /// Speech recognizer shared by every connection
    pub transcriber: Arc<dyn Transcriber>,

    /// Builds one speech classifier per ingest connection
    pub classifiers: Arc<dyn ClassifierFactory>,

    pub vad: VadConfig,
}

impl ApiState {
    /// Wire the HTTP backends described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsClient::new(&config.llm)?);
        let synthesizer: Arc<dyn Synthesizer> = Arc::new(TextToSpeech::new(config.tts.clone())?);
        let transcriber: Arc<dyn Transcriber> = Arc::new(SpeechToText::new(&config.asr));

        let segmenter = SentenceSegmenter::new(
            config.segmenter,
            Arc::new(EmotionTable::new(config.extra_ref_audio.clone())),
        );
        let pipeline = TurnPipeline::new(
            llm,
            synthesizer,
            segmenter,
            observer_for(config.reaction_url.as_deref()),
            config.pipeline,
        );

        Ok(Self {
            pipeline,
            transcriber,
            classifiers: energy_classifier_factory(config.vad),
            vad: config.vad,
        })
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    // CORS layer for cross-origin requests from browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(asr::router(Arc::clone(&state)))
        .merge(chat::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    bind: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, server: &ServerConfig) -> Self {
        Self {
            state: Arc::new(state),
            bind: server.bind.clone(),
            port: server.port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// API errors
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Upstream(String),
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e.kind() {
            ErrorKind::Decode | ErrorKind::ParseFailure => Self::BadRequest(e.to_string()),
            ErrorKind::UpstreamUnavailable | ErrorKind::SynthesisFailure => {
                Self::Upstream(e.to_string())
            }
            ErrorKind::Transport | ErrorKind::Internal => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_unavailable", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
