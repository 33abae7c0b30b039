//! Configuration management for the Murmur gateway
//!
//! Values resolve in three layers: built-in defaults, then the config file,
//! then `MURMUR_*` environment variables.

pub mod file;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{Error, Result};

/// Sample rate every component assumes (16 kHz mono)
pub const SAMPLE_RATE: u32 = 16_000;

/// Murmur gateway configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Voice activity detection
    pub vad: VadConfig,

    /// Sentence segmentation
    pub segmenter: SegmenterConfig,

    /// Queue sizing and scheduling
    pub pipeline: PipelineConfig,

    /// Language model backend
    pub llm: LlmConfig,

    /// Speech recognition backend
    pub asr: AsrConfig,

    /// Speech synthesis backend
    pub tts: TtsConfig,

    /// Emotion label to reference audio/text pair
    pub extra_ref_audio: HashMap<String, ReferenceAudio>,

    /// Post-turn reaction service URL (disabled when `None`)
    pub reaction_url: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Address to bind
    pub bind: String,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Samples accumulated before a window is released (240 = 15 ms)
    pub min_window_samples: usize,

    /// Padding kept before speech start and after speech end
    pub speech_pad_ms: u32,

    /// Silence needed before speech is considered over
    pub min_silence_ms: u32,

    /// RMS energy above which a window counts as speech
    pub energy_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_window_samples: 240,
            speech_pad_ms: 120,
            min_silence_ms: 100,
            energy_threshold: 0.03,
        }
    }
}

impl VadConfig {
    /// Padding length in samples
    #[must_use]
    pub const fn speech_pad_samples(&self) -> usize {
        ms_to_samples(self.speech_pad_ms)
    }

    /// Minimum silence length in samples
    #[must_use]
    pub const fn min_silence_samples(&self) -> usize {
        ms_to_samples(self.min_silence_ms)
    }
}

const fn ms_to_samples(ms: u32) -> usize {
    (SAMPLE_RATE as usize / 1000) * ms as usize
}

/// Sentence segmentation configuration
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// A weak terminator cuts only once the chunk is longer than this
    pub weak_min_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { weak_min_chars: 10 }
    }
}

/// Turn pipeline configuration
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Capacity of the text→synthesis and synthesis→multiplexer queues
    pub queue_capacity: usize,

    /// Multiplexer poll timeout
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Language model configuration (OpenAI-compatible chat completions)
#[derive(Debug)]
pub struct LlmConfig {
    /// Chat completions endpoint
    pub api: String,

    /// Bearer token
    pub key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// Connect/read timeout
    pub timeout: Duration,

    /// Extra request body fields
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Speech recognition configuration (Whisper-compatible transcription API)
#[derive(Debug)]
pub struct AsrConfig {
    /// Transcription endpoint
    pub api: String,

    /// Bearer token
    pub key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// Spoken language hint
    pub language: Option<String>,
}

/// Speech synthesis configuration (GPT-SoVITS-compatible API)
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis endpoint
    pub api: String,

    /// Language of the text to synthesize
    pub text_lang: String,

    /// Default reference audio
    pub ref_audio_path: String,

    /// Transcript of the default reference audio
    pub prompt_text: String,

    /// Language of the reference transcript
    pub prompt_lang: String,

    pub seed: i64,
    pub top_k: u32,
    pub batch_size: u32,

    /// Per-request timeout
    pub timeout: Duration,

    /// Extra request body fields
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reference audio and its transcript, used to steer voice style
///
/// Written in config files as a two-element list: `["path.wav", "transcript"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String)")]
pub struct ReferenceAudio {
    pub audio_path: String,
    pub text: String,
}

impl From<(String, String)> for ReferenceAudio {
    fn from((audio_path, text): (String, String)) -> Self {
        Self { audio_path, text }
    }
}

impl Config {
    /// Load configuration from the default file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Load configuration from an explicit file path and environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be parsed or the result is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Self::from_file(fc)
    }

    /// Build configuration from a parsed file, applying env overrides
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_file(fc: file::MurmurConfigFile) -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let server = ServerConfig {
            port: env("MURMUR_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(8001),
            bind: fc.server.bind.unwrap_or_else(|| "0.0.0.0".to_string()),
        };

        let vad_defaults = VadConfig::default();
        let vad = VadConfig {
            min_window_samples: fc
                .vad
                .min_window_samples
                .unwrap_or(vad_defaults.min_window_samples),
            speech_pad_ms: fc.vad.speech_pad_ms.unwrap_or(vad_defaults.speech_pad_ms),
            min_silence_ms: fc.vad.min_silence_ms.unwrap_or(vad_defaults.min_silence_ms),
            energy_threshold: fc
                .vad
                .energy_threshold
                .unwrap_or(vad_defaults.energy_threshold),
        };

        let segmenter = SegmenterConfig {
            weak_min_chars: fc
                .segmenter
                .weak_min_chars
                .unwrap_or(SegmenterConfig::default().weak_min_chars),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            queue_capacity: fc
                .pipeline
                .queue_capacity
                .unwrap_or(pipeline_defaults.queue_capacity),
            poll_interval: fc
                .pipeline
                .poll_interval_ms
                .map_or(pipeline_defaults.poll_interval, Duration::from_millis),
        };

        let llm = LlmConfig {
            api: env("MURMUR_LLM_API")
                .or(fc.llm.api)
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            key: env("MURMUR_LLM_KEY").or(fc.llm.key).map(SecretString::from),
            model: env("MURMUR_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(10)),
            extra: fc.llm.extra_config,
        };

        let asr = AsrConfig {
            api: env("MURMUR_ASR_API")
                .or(fc.asr.api)
                .unwrap_or_else(|| "https://api.openai.com/v1/audio/transcriptions".to_string()),
            key: env("MURMUR_ASR_KEY").or(fc.asr.key).map(SecretString::from),
            model: env("MURMUR_ASR_MODEL")
                .or(fc.asr.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            language: fc.asr.language,
        };

        let tts = TtsConfig {
            api: env("MURMUR_TTS_API")
                .or(fc.tts.api)
                .unwrap_or_else(|| "http://127.0.0.1:9880/tts".to_string()),
            text_lang: fc.tts.text_lang.unwrap_or_else(|| "zh".to_string()),
            ref_audio_path: fc.tts.ref_audio_path.unwrap_or_default(),
            prompt_text: fc.tts.prompt_text.unwrap_or_default(),
            prompt_lang: fc.tts.prompt_lang.unwrap_or_else(|| "zh".to_string()),
            seed: fc.tts.seed.unwrap_or(-1),
            top_k: fc.tts.top_k.unwrap_or(15),
            batch_size: fc.tts.batch_size.unwrap_or(20),
            timeout: Duration::from_secs(fc.tts.timeout_secs.unwrap_or(10)),
            extra: fc.tts.ex_config,
        };

        let config = Self {
            server,
            vad,
            segmenter,
            pipeline,
            llm,
            asr,
            tts,
            extra_ref_audio: fc.extra_ref_audio,
            reaction_url: env("MURMUR_REACTION_URL").or(fc.reaction_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the pipeline relies on
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.vad.min_window_samples == 0 {
            return Err(Error::Config("vad.min_window_samples must be > 0".to_string()));
        }
        if !(self.vad.energy_threshold > 0.0 && self.vad.energy_threshold < 1.0) {
            return Err(Error::Config(
                "vad.energy_threshold must be within (0, 1)".to_string(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::Config("pipeline.queue_capacity must be > 0".to_string()));
        }
        if self.pipeline.poll_interval.is_zero() {
            return Err(Error::Config("pipeline.poll_interval_ms must be > 0".to_string()));
        }

        let urls = [
            ("llm.api", Some(self.llm.api.as_str())),
            ("asr.api", Some(self.asr.api.as_str())),
            ("tts.api", Some(self.tts.api.as_str())),
            ("reaction_url", self.reaction_url.as_deref()),
        ];
        for (name, value) in urls
            .into_iter()
            .filter_map(|(name, value)| Some((name, value?)))
        {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
        }

        Ok(())
    }
}
