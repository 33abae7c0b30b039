//! Configuration file loading
//!
//! Supports `~/.config/murmur/config.toml` as a persistent config source.
//! YAML is accepted when the file extension is `.yaml` or `.yml`.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ReferenceAudio;
use crate::{Error, Result};

/// Top-level configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MurmurConfigFile {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Sentence segmentation
    #[serde(default)]
    pub segmenter: SegmenterFileConfig,

    /// Queue sizing and scheduling
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// Language model backend
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech recognition backend
    #[serde(default)]
    pub asr: AsrFileConfig,

    /// Speech synthesis backend
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Emotion label to reference audio/text pair
    #[serde(default)]
    pub extra_ref_audio: HashMap<String, ReferenceAudio>,

    /// Post-turn reaction service URL
    #[serde(default)]
    pub reaction_url: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
}

/// VAD configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub min_window_samples: Option<usize>,
    pub speech_pad_ms: Option<u32>,
    pub min_silence_ms: Option<u32>,
    pub energy_threshold: Option<f32>,
}

/// Segmenter configuration
#[derive(Debug, Default, Deserialize)]
pub struct SegmenterFileConfig {
    pub weak_min_chars: Option<usize>,
}

/// Pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    pub queue_capacity: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

/// LLM configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub api: Option<String>,
    pub key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Extra request body fields (temperature, top_p, ...)
    #[serde(default)]
    pub extra_config: serde_json::Map<String, serde_json::Value>,
}

/// ASR configuration
#[derive(Debug, Default, Deserialize)]
pub struct AsrFileConfig {
    pub api: Option<String>,
    pub key: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub api: Option<String>,
    pub text_lang: Option<String>,
    pub ref_audio_path: Option<String>,
    pub prompt_text: Option<String>,
    pub prompt_lang: Option<String>,
    pub seed: Option<i64>,
    pub top_k: Option<u32>,
    pub batch_size: Option<u32>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub ex_config: serde_json::Map<String, serde_json::Value>,
}

/// Parse a config file, picking the format from its extension
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn read_config_file(path: &Path) -> Result<MurmurConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        Ok(serde_yaml::from_str(&content)?)
    } else {
        toml::from_str(&content).map_err(Error::from)
    }
}

/// Load the config file from the standard path
///
/// Returns `MurmurConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MurmurConfigFile {
    let Some(path) = config_file_path() else {
        return MurmurConfigFile::default();
    };

    if !path.exists() {
        return MurmurConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            MurmurConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/murmur/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("murmur").join("config.toml"))
}
