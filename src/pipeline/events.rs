//! Client-visible turn events and their JSON wire shape

use std::borrow::Cow;

use base64::Engine;
use serde::Serialize;

/// One event of a conversation turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Raw model output, echoed as it arrives
    TextDelta(String),

    /// Synthesized audio for one sentence chunk
    AudioReady {
        seq: u64,
        audio: Vec<u8>,
        paired_text: String,
    },

    /// The turn finished; carries the full reply
    TurnComplete { full_text: String },

    /// The turn was aborted
    Error { message: String },
}

/// JSON shape shared by every server event: `{"type","data","done"}`
#[derive(Debug, Serialize)]
pub struct WireEvent<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Cow<'a, str>,
    pub done: bool,
}

impl<'a> WireEvent<'a> {
    #[must_use]
    pub fn new(kind: &'static str, data: impl Into<Cow<'a, str>>, done: bool) -> Self {
        Self {
            kind,
            data: data.into(),
            done,
        }
    }
}

impl PipelineEvent {
    /// Whether this event ends the turn
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnComplete { .. } | Self::Error { .. })
    }

    /// Wire representation; audio is URL-safe base64 of the WAV bytes
    #[must_use]
    pub fn to_wire(&self) -> WireEvent<'_> {
        match self {
            Self::TextDelta(text) => WireEvent::new("text", text.as_str(), false),
            Self::AudioReady { audio, .. } => WireEvent::new(
                "audio",
                base64::engine::general_purpose::URL_SAFE.encode(audio),
                false,
            ),
            Self::TurnComplete { full_text } => WireEvent::new("complete", full_text.as_str(), true),
            Self::Error { message } => WireEvent::new("error", message.as_str(), true),
        }
    }
}
