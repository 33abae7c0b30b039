//! Text-to-speech (TTS) processing

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::{ReferenceAudio, TtsConfig};
use crate::{Error, Result};

/// Inline media tags the chat model may emit (`{image:...}`, `{meme:...}`)
static MEDIA_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(image|meme|pics):.*?\}").expect("valid regex"));

/// Parenthesised and bracketed asides (stage directions, emotion tags)
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$(（\[].*?[\]）)]").expect("valid regex"));

/// Characters that must not open a synthesized utterance
const LEADING_PUNCTUATION: &[char] = &['…', '~', '～', '。', '？', '！', '?', '!', ',', '，'];

/// Strip markup the voice should not read aloud
///
/// Removes media tags and bracketed spans, drops spaces and newlines, and
/// skips leading punctuation. Returns an empty string when nothing
/// speakable remains.
#[must_use]
pub fn clean_for_synthesis(text: &str) -> String {
    let text = MEDIA_TAG.replace_all(text, "");
    let text = BRACKETED.replace_all(&text, "");
    let text: String = text.chars().filter(|c| *c != ' ' && *c != '\n').collect();

    text.trim_start_matches(LEADING_PUNCTUATION).to_string()
}

/// One synthesis call: text plus an optional voice reference override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub reference: Option<ReferenceAudio>,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, reference: Option<ReferenceAudio>) -> Self {
        Self {
            text: text.into(),
            reference,
        }
    }
}

/// Speech synthesis collaborator
///
/// Failures never cross this boundary: `None` means no audio for this
/// request and the caller moves on.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Option<Vec<u8>>;
}

/// Synthesizes speech through a GPT-SoVITS-compatible HTTP endpoint
pub struct TextToSpeech {
    client: reqwest::Client,
    config: TtsConfig,
}

impl TextToSpeech {
    /// Create a synthesizer from the TTS config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build TTS client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Build the JSON request body for already-cleaned text
    #[must_use]
    pub fn request_body(&self, text: &str, reference: Option<&ReferenceAudio>) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("text".into(), text.into());
        body.insert("text_lang".into(), self.config.text_lang.clone().into());
        body.insert("ref_audio_path".into(), self.config.ref_audio_path.clone().into());
        body.insert("prompt_text".into(), self.config.prompt_text.clone().into());
        body.insert("prompt_lang".into(), self.config.prompt_lang.clone().into());
        body.insert("seed".into(), self.config.seed.into());
        body.insert("top_k".into(), self.config.top_k.into());
        body.insert("batch_size".into(), self.config.batch_size.into());

        for (key, value) in &self.config.extra {
            body.insert(key.clone(), value.clone());
        }

        if let Some(reference) = reference {
            body.insert("ref_audio_path".into(), reference.audio_path.clone().into());
            body.insert("prompt_text".into(), reference.text.clone().into());
        }

        serde_json::Value::Object(body)
    }

    /// Send one request, surfacing the failure reason
    async fn request(&self, body: &serde_json::Value) -> Result<Vec<u8>> {
        let response = self.client.post(&self.config.api).json(body).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, request: &SynthesisRequest) -> Option<Vec<u8>> {
        let text = clean_for_synthesis(&request.text);
        if text.is_empty() {
            tracing::debug!(raw = %request.text, "nothing speakable after cleaning");
            return None;
        }

        let body = self.request_body(&text, request.reference.as_ref());
        tracing::debug!(text = %text, emotion_ref = request.reference.is_some(), "synthesizing");

        match self.request(&body).await {
            Ok(audio) => {
                tracing::debug!(bytes = audio.len(), "synthesis complete");
                Some(audio)
            }
            Err(e) => {
                tracing::error!(error = %e, text = %text, "synthesis failed");
                None
            }
        }
    }
}
