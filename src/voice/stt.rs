//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::AsrConfig;
use crate::{Error, Result};

/// Turns one utterance into text
///
/// `Ok(None)` means nothing intelligible was said; it is not an error.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a 16 kHz mono PCM16 WAV buffer
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer is unreachable or rejects the audio
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>>;
}

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech through a Whisper-compatible HTTP endpoint
pub struct SpeechToText {
    client: reqwest::Client,
    api: String,
    api_key: Option<SecretString>,
    model: String,
    language: Option<String>,
}

impl SpeechToText {
    /// Create a transcriber from the ASR config
    #[must_use]
    pub fn new(config: &AsrConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api: config.api.clone(),
            api_key: config.key.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        tracing::debug!(audio_bytes = wav.len(), api = %self.api, "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.api).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let text = result.text.trim();
        if text.is_empty() {
            tracing::debug!("empty transcript");
            return Ok(None);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(Some(text.to_string()))
    }
}
