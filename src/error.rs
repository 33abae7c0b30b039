//! Error types for the Murmur gateway

use thiserror::Error;

/// Result type alias for Murmur operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Murmur gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio encoding/decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed client payload (bad base64, odd PCM length, bad JSON frame)
    #[error("decode error: {0}")]
    Decode(String),

    /// Speech classifier failure
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Malformed fragment in the LLM stream
    #[error("LLM parse error: {0}")]
    LlmParse(String),

    /// LLM or TTS backend unreachable, timed out or answered non-2xx
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// Client transport went away or sent an unusable frame
    #[error("transport error: {0}")]
    Transport(String),

    /// Work abandoned because the turn was cancelled
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

/// How the pipeline reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Abort silently and release connection state
    Transport,
    /// Drop the offending message, keep the connection
    Decode,
    /// Surface an `error` event and abort the turn
    UpstreamUnavailable,
    /// Drop one chunk's audio, continue the turn
    SynthesisFailure,
    /// Skip the fragment, continue the stream
    ParseFailure,
    /// Anything else: surfaced like an upstream failure
    Internal,
}

impl Error {
    /// Classify this error for the pipeline's decision table
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Cancelled => ErrorKind::Transport,
            Self::Decode(_) | Self::Base64(_) => ErrorKind::Decode,
            Self::Upstream(_) | Self::Http(_) | Self::Stt(_) => ErrorKind::UpstreamUnavailable,
            Self::Tts(_) => ErrorKind::SynthesisFailure,
            Self::LlmParse(_) | Self::Serialization(_) => ErrorKind::ParseFailure,
            Self::Config(_)
            | Self::Audio(_)
            | Self::Vad(_)
            | Self::Io(_)
            | Self::Toml(_)
            | Self::Yaml(_)
            | Self::Wav(_) => ErrorKind::Internal,
        }
    }
}
