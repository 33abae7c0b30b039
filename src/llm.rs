//! Language model collaborator
//!
//! Streams a chat reply as raw text deltas from an OpenAI-compatible
//! `chat/completions` endpoint.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// One message of the conversation sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Ordered text deltas; an `Err` item is either a skippable parse failure or
/// a terminal upstream failure, distinguished by [`Error::kind`]
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Produces a streamed reply for a conversation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a reply for `messages`
    ///
    /// # Errors
    ///
    /// Returns an upstream error if the backend cannot be reached or refuses
    /// the request
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream>;
}

/// Streaming chunk of a chat completion
#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    delta: CompletionDelta,
}

#[derive(Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

/// Splits an SSE byte stream into `data:` payloads
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks are decoded intact.
#[derive(Default)]
struct SseLines {
    pending: Vec<u8>,
    done: bool,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        self.pending.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);

            match parse_line(&line) {
                Line::Delta(text) => items.push(Ok(text)),
                Line::Malformed(e) => items.push(Err(e)),
                Line::Done => {
                    self.done = true;
                    self.pending.clear();
                    break;
                }
                Line::Skip => {}
            }
        }
        items
    }

    /// Parse a final line the backend closed without terminating
    fn finish(&mut self) -> Vec<Result<String>> {
        if self.done || self.pending.is_empty() {
            return Vec::new();
        }
        self.done = true;
        let line = std::mem::take(&mut self.pending);

        match parse_line(&String::from_utf8_lossy(&line)) {
            Line::Delta(text) => vec![Ok(text)],
            Line::Malformed(e) => vec![Err(e)],
            Line::Done | Line::Skip => Vec::new(),
        }
    }
}

enum Line {
    Delta(String),
    Malformed(Error),
    Done,
    Skip,
}

fn parse_line(line: &str) -> Line {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Line::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Line::Done;
    }

    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map_or(Line::Skip, Line::Delta),
        Err(e) => Line::Malformed(Error::LlmParse(format!("{e}: {data}"))),
    }
}

/// OpenAI-compatible streaming chat client
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api: String,
    api_key: Option<SecretString>,
    model: String,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatCompletionsClient {
    /// Create a client from the LLM config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build LLM client: {e}")))?;

        Ok(Self {
            client,
            api: config.api.clone(),
            api_key: config.key.clone(),
            model: config.model.clone(),
            extra: config.extra.clone(),
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Result<serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert("model".into(), self.model.clone().into());
        body.insert("stream".into(), true.into());
        for (key, value) in &self.extra {
            body.insert(key.clone(), value.clone());
        }
        body.insert("messages".into(), serde_json::to_value(messages)?);
        Ok(serde_json::Value::Object(body))
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream> {
        let body = self.request_body(messages)?;
        tracing::info!(model = %self.model, messages = messages.len(), "LLM request");

        let mut request = self.client.post(&self.api).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "LLM request failed");
            Error::Upstream(format!("LLM unreachable: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "LLM API error");
            return Err(Error::Upstream(format!("LLM API error {status}")));
        }

        // `None` marks the end of the body so a trailing partial line is still parsed
        let deltas = response
            .bytes_stream()
            .map(Some)
            .chain(stream::once(futures::future::ready(None)))
            .scan(SseLines::default(), |lines, chunk| {
                if lines.done {
                    return futures::future::ready(None);
                }
                let items = match chunk {
                    Some(Ok(bytes)) => lines.push(&bytes),
                    Some(Err(e)) => {
                        lines.done = true;
                        vec![Err(Error::Upstream(format!("LLM stream interrupted: {e}")))]
                    }
                    None => lines.finish(),
                };
                futures::future::ready(Some(items))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(deltas))
    }
}

/// Replies with a fixed text, used to voice text that needs no model
pub struct StaticReply {
    text: String,
}

impl StaticReply {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl LanguageModel for StaticReply {
    async fn stream_chat(&self, _messages: &[ChatMessage]) -> Result<DeltaStream> {
        let text: Result<String> = Ok(self.text.clone());
        Ok(Box::pin(stream::iter([text])))
    }
}
