//! Voice processing module
//!
//! Turns a client's PCM stream into utterances and transcripts, and wraps
//! the speech recognition and synthesis backends.

pub mod ingest;
pub mod stt;
pub mod tts;
pub mod utterance;
pub mod vad;
pub mod wav;

pub use ingest::{AudioFrame, AudioIngestWindow, NormalizedWindow};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{SynthesisRequest, Synthesizer, TextToSpeech, clean_for_synthesis};
pub use utterance::{ListenSession, UtteranceAssembler};
pub use vad::{
    Boundary, ClassifierFactory, EnergyClassifier, SpeechClassifier, Utterance, VadEvent, VadState,
    VoiceActivityDetector, energy_classifier_factory,
};
pub use wav::{decode_base64_payload, pcm16_from_bytes, samples_to_wav, wav_to_pcm16};
