//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use murmur_gateway::api::ApiState;
use murmur_gateway::config::SAMPLE_RATE;
use murmur_gateway::config::file::MurmurConfigFile;
use murmur_gateway::llm::{ChatMessage, DeltaStream, LanguageModel};
use murmur_gateway::pipeline::{
    EmotionTable, LoggingObserver, SentenceSegmenter, TurnObserver, TurnPipeline,
};
use murmur_gateway::voice::{
    SynthesisRequest, Synthesizer, Transcriber, energy_classifier_factory, samples_to_wav,
    wav_to_pcm16,
};
use murmur_gateway::{Config, Error, Result};

/// Default configuration without touching the user's config file
#[must_use]
pub fn test_config() -> Config {
    Config::from_file(MurmurConfigFile::default()).expect("default config is valid")
}

/// Generate a sine wave at the given frequency
pub fn generate_sine_samples(freq: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Generate silence
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// 2 s silence, 1 s tone, 1 s silence, round-tripped through a WAV file
pub fn spoken_clip() -> Vec<i16> {
    let mut clip = generate_silence(2.0);
    clip.extend(generate_sine_samples(440.0, 1.0, 0.5));
    clip.extend(generate_silence(1.0));

    let wav = samples_to_wav(&clip, SAMPLE_RATE).unwrap();
    let (samples, rate) = wav_to_pcm16(&wav).unwrap();
    assert_eq!(rate, SAMPLE_RATE);
    samples
}

/// Set when the owning value is dropped
#[derive(Clone, Default)]
pub struct DropFlag(Arc<AtomicBool>);

impl DropFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn guard(&self) -> DropSignal {
        DropSignal(Arc::clone(&self.0))
    }
}

pub struct DropSignal(Arc<AtomicBool>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Wait up to a second for `flag` to be set
pub async fn wait_for(flag: &DropFlag) -> bool {
    for _ in 0..100 {
        if flag.is_set() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.is_set()
}

/// One step of a scripted model reply
#[derive(Clone)]
pub enum Step {
    Delta(&'static str),
    Malformed,
    Fail(&'static str),
    /// Never yield again
    Hang,
}

/// Language model replaying a fixed script
pub struct ScriptedLlm {
    steps: Vec<Step>,
    refuse: Option<&'static str>,
    pub stream_dropped: DropFlag,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            refuse: None,
            stream_dropped: DropFlag::default(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn deltas(deltas: &[&'static str]) -> Self {
        Self::new(deltas.iter().copied().map(Step::Delta).collect())
    }

    /// Reject the request before streaming anything
    pub fn unavailable(message: &'static str) -> Self {
        Self {
            refuse: Some(message),
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream> {
        self.requests.lock().unwrap().push(messages.to_vec());

        if let Some(message) = self.refuse {
            return Err(Error::Upstream(message.to_string()));
        }

        let guard = self.stream_dropped.guard();
        let steps = self.steps.clone();

        let items = stream::iter(steps).flat_map(|step| match step {
            Step::Delta(text) => stream::once(async move { Ok(text.to_string()) }).boxed(),
            Step::Malformed => {
                stream::once(async { Err(Error::LlmParse("{bad".to_string())) }).boxed()
            }
            Step::Fail(message) => {
                stream::once(async move { Err(Error::Upstream(message.to_string())) }).boxed()
            }
            Step::Hang => stream::pending().boxed(),
        });

        Ok(Box::pin(items.map(move |item| {
            let _held = &guard;
            item
        })))
    }
}

/// Synthesizer returning `audio:<text>`, failing any text containing "失败"
#[derive(Default)]
pub struct ScriptedTts {
    pub calls: Mutex<Vec<String>>,
    pub hang: bool,
    pub call_dropped: DropFlag,
}

impl ScriptedTts {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn audio_for(text: &str) -> Vec<u8> {
        format!("audio:{text}").into_bytes()
    }
}

#[async_trait]
impl Synthesizer for ScriptedTts {
    async fn synthesize(&self, request: &SynthesisRequest) -> Option<Vec<u8>> {
        self.calls.lock().unwrap().push(request.text.clone());

        if self.hang {
            let _guard = self.call_dropped.guard();
            std::future::pending::<()>().await;
        }

        (!request.text.contains("失败")).then(|| Self::audio_for(&request.text))
    }
}

/// Transcriber returning a fixed reply and counting calls
pub struct RecordingAsr {
    reply: Option<String>,
    calls: AtomicUsize,
    hang: bool,
    pub last_audio: Mutex<Vec<u8>>,
    pub call_dropped: DropFlag,
}

impl RecordingAsr {
    pub fn new(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(str::to_string),
            calls: AtomicUsize::new(0),
            hang: false,
            last_audio: Mutex::new(Vec::new()),
            call_dropped: DropFlag::default(),
        }
    }

    /// Never finish a transcription
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(None)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for RecordingAsr {
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_audio.lock().unwrap() = wav.to_vec();

        if self.hang {
            let _guard = self.call_dropped.guard();
            std::future::pending::<()>().await;
        }

        Ok(self.reply.clone())
    }
}

/// Observer recording every completed turn
#[derive(Default)]
pub struct CapturingObserver(pub Mutex<Vec<String>>);

#[async_trait]
impl TurnObserver for CapturingObserver {
    async fn turn_completed(&self, full_text: &str) {
        self.0.lock().unwrap().push(full_text.to_string());
    }
}

/// Turn pipeline over fakes, with the default segmenter settings
pub fn test_pipeline(
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn Synthesizer>,
    observer: Option<Arc<dyn TurnObserver>>,
) -> TurnPipeline {
    let config = test_config();
    TurnPipeline::new(
        llm,
        tts,
        SentenceSegmenter::new(config.segmenter, Arc::new(EmotionTable::default())),
        observer.unwrap_or_else(|| Arc::new(LoggingObserver)),
        config.pipeline,
    )
}

/// API state over fakes
pub fn test_state(
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn Synthesizer>,
    asr: Arc<dyn Transcriber>,
) -> Arc<ApiState> {
    let config = test_config();
    Arc::new(ApiState {
        pipeline: test_pipeline(llm, tts, None),
        transcriber: asr,
        classifiers: energy_classifier_factory(config.vad),
        vad: config.vad,
    })
}
