//! Murmur Gateway - real-time spoken conversation pipeline
//!
//! This library turns a client's microphone stream into utterances and
//! transcripts, and a streamed model reply into interleaved text and
//! synthesized speech:
//! - Voice activity detection and utterance assembly
//! - Sentence segmentation of streamed model output
//! - Serial speech synthesis with per-chunk failure tolerance
//! - One ordered SSE event stream per conversation turn
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  client audio ─► ingest ─► VAD ─► utterance ─► ASR       │
//! └──────────────────────────────────────────────────────────┘
//! ┌──────────────────────────────────────────────────────────┐
//! │  LLM deltas ─► segmenter ─► synthesis ─┐                 │
//! │       └──────────────── text ──────────┴► multiplexer ─► │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use llm::{ChatMessage, LanguageModel};
pub use pipeline::{PipelineEvent, Turn, TurnPipeline};
