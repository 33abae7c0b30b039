//! Voice activity detection
//!
//! A per-connection state machine (`Idle` / `Speaking`) driven by a
//! pluggable [`SpeechClassifier`]. The classifier only reports boundaries;
//! the detector owns the utterance buffer and the leading pad.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{SAMPLE_RATE, VadConfig};
use crate::Result;

use super::ingest::NormalizedWindow;

/// Boundary reported by a classifier for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Speech begins in this window
    Start,
    /// Speech ended in this window
    End,
}

/// Stateful speech/non-speech classifier
///
/// Implementations keep their own memory across windows (hangover counters,
/// model state) and are owned by exactly one connection.
pub trait SpeechClassifier: Send {
    /// Inspect one window and report a boundary, if any
    ///
    /// # Errors
    ///
    /// Returns error if the classifier cannot evaluate the window
    fn classify(&mut self, window: &[f32]) -> Result<Option<Boundary>>;

    /// Forget all accumulated state
    fn reset(&mut self);
}

/// Builds a fresh classifier for each new connection
pub trait ClassifierFactory: Send + Sync {
    fn create(&self) -> Box<dyn SpeechClassifier>;
}

impl<F> ClassifierFactory for F
where
    F: Fn() -> Box<dyn SpeechClassifier> + Send + Sync,
{
    fn create(&self) -> Box<dyn SpeechClassifier> {
        self()
    }
}

/// Factory producing [`EnergyClassifier`]s from the VAD config
#[must_use]
pub fn energy_classifier_factory(config: VadConfig) -> Arc<dyn ClassifierFactory> {
    Arc::new(move || Box::new(EnergyClassifier::new(&config)) as Box<dyn SpeechClassifier>)
}

/// Calculate RMS energy of audio samples
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / samples.len() as f32;
    mean.sqrt()
}

/// RMS-energy classifier with a silence hangover
///
/// Speech starts on the first window above the threshold and ends once
/// `min_silence + speech_pad` worth of quiet samples have followed it, so
/// the trailing pad is already inside the utterance when `End` fires.
#[derive(Debug)]
pub struct EnergyClassifier {
    threshold: f32,
    end_after_samples: usize,
    triggered: bool,
    silence_run: usize,
}

impl EnergyClassifier {
    #[must_use]
    pub const fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.energy_threshold,
            end_after_samples: config.min_silence_samples() + config.speech_pad_samples(),
            triggered: false,
            silence_run: 0,
        }
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn classify(&mut self, window: &[f32]) -> Result<Option<Boundary>> {
        let energy = calculate_energy(window);

        if energy >= self.threshold {
            self.silence_run = 0;
            if !self.triggered {
                self.triggered = true;
                tracing::trace!(energy, "energy above threshold");
                return Ok(Some(Boundary::Start));
            }
            return Ok(None);
        }

        if self.triggered {
            self.silence_run += window.len();
            if self.silence_run >= self.end_after_samples {
                self.triggered = false;
                self.silence_run = 0;
                return Ok(Some(Boundary::End));
            }
        }

        Ok(None)
    }

    fn reset(&mut self) {
        self.triggered = false;
        self.silence_run = 0;
    }
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
}

/// One sealed span of speech, including its padding
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<f32>,
}

impl Utterance {
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Length of the utterance in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / u64::from(SAMPLE_RATE)
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Events emitted by the detector
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// An utterance opened
    Start,
    /// A window was appended to the open utterance
    Continue,
    /// The open utterance closed
    End(Utterance),
}

/// Per-connection voice activity detector
pub struct VoiceActivityDetector {
    classifier: Box<dyn SpeechClassifier>,
    state: VadState,
    utterance: Vec<f32>,
    pre_roll: VecDeque<f32>,
    pad_samples: usize,
}

impl VoiceActivityDetector {
    /// Create a detector around a classifier
    #[must_use]
    pub fn new(classifier: Box<dyn SpeechClassifier>, config: &VadConfig) -> Self {
        let pad_samples = config.speech_pad_samples();
        Self {
            classifier,
            state: VadState::Idle,
            utterance: Vec::new(),
            pre_roll: VecDeque::with_capacity(pad_samples),
            pad_samples,
        }
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    /// Whether an utterance is currently open
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }

    /// Feed one window and advance the state machine
    ///
    /// Idle windows without a boundary produce nothing. A classifier failure
    /// drops the event for this window and leaves the state untouched; if an
    /// utterance is open the window is still appended so the audio stays
    /// contiguous.
    pub fn process(&mut self, window: &NormalizedWindow) -> Option<VadEvent> {
        let samples = window.samples();

        let boundary = match self.classifier.classify(samples) {
            Ok(boundary) => boundary,
            Err(e) => {
                tracing::warn!(error = %e, state = ?self.state, "speech classifier failed, skipping window");
                match self.state {
                    VadState::Speaking => self.utterance.extend_from_slice(samples),
                    VadState::Idle => self.remember(samples),
                }
                return None;
            }
        };

        match (self.state, boundary) {
            (VadState::Idle, Some(Boundary::Start)) => {
                self.utterance.clear();
                self.utterance.extend(self.pre_roll.drain(..));
                self.utterance.extend_from_slice(samples);
                self.state = VadState::Speaking;
                tracing::debug!(pre_roll = self.utterance.len() - samples.len(), "speech started");
                Some(VadEvent::Start)
            }
            (VadState::Idle, _) => {
                self.remember(samples);
                None
            }
            (VadState::Speaking, Some(Boundary::End)) => {
                self.utterance.extend_from_slice(samples);
                self.state = VadState::Idle;
                let utterance = Utterance {
                    samples: std::mem::take(&mut self.utterance),
                };
                tracing::debug!(duration_ms = utterance.duration_ms(), "speech ended");
                Some(VadEvent::End(utterance))
            }
            (VadState::Speaking, _) => {
                self.utterance.extend_from_slice(samples);
                Some(VadEvent::Continue)
            }
        }
    }

    /// Return to `Idle`, discarding any open utterance
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.state = VadState::Idle;
        self.utterance.clear();
        self.pre_roll.clear();
    }

    /// Keep the most recent `pad_samples` of idle audio for the next start
    fn remember(&mut self, samples: &[f32]) {
        if self.pad_samples == 0 {
            return;
        }
        self.pre_roll.extend(samples.iter().copied());
        let excess = self.pre_roll.len().saturating_sub(self.pad_samples);
        self.pre_roll.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn window(value: f32, len: usize) -> NormalizedWindow {
        NormalizedWindow::from(vec![value; len])
    }

    fn detector() -> VoiceActivityDetector {
        let config = VadConfig::default();
        VoiceActivityDetector::new(Box::new(EnergyClassifier::new(&config)), &config)
    }

    /// Replays a fixed list of classifier outcomes
    struct Scripted(VecDeque<Result<Option<Boundary>>>);

    impl SpeechClassifier for Scripted {
        fn classify(&mut self, _window: &[f32]) -> Result<Option<Boundary>> {
            self.0.pop_front().unwrap_or(Ok(None))
        }

        fn reset(&mut self) {}
    }

    fn scripted(outcomes: Vec<Result<Option<Boundary>>>) -> VoiceActivityDetector {
        VoiceActivityDetector::new(
            Box::new(Scripted(outcomes.into())),
            &VadConfig {
                speech_pad_ms: 0,
                ..VadConfig::default()
            },
        )
    }

    #[test]
    fn energy_of_silence_is_zero() {
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
        assert!(calculate_energy(&[0.0; 64]).abs() < f32::EPSILON);
        assert!((calculate_energy(&[0.5; 64]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn silence_produces_no_events() {
        let mut vad = detector();
        for _ in 0..100 {
            assert!(vad.process(&window(0.0, 320)).is_none());
        }
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn start_then_end_with_padding() {
        let mut vad = detector();
        // 200 ms of idle audio fills the 120 ms pre-roll
        for _ in 0..10 {
            vad.process(&window(0.001, 320));
        }

        assert_eq!(vad.process(&window(0.5, 320)), Some(VadEvent::Start));
        assert_eq!(vad.process(&window(0.5, 320)), Some(VadEvent::Continue));

        // 220 ms of silence closes the utterance
        let mut ended = None;
        for _ in 0..20 {
            if let Some(VadEvent::End(u)) = vad.process(&window(0.0, 320)) {
                ended = Some(u);
                break;
            }
        }

        let utterance = ended.expect("utterance should end");
        // pre-roll + two speech windows + trailing silence
        assert_eq!(utterance.samples().len(), 1920 + 640 + 11 * 320);
        assert!(utterance.samples()[..1920].iter().all(|s| (*s - 0.001).abs() < 1e-6));
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn end_without_start_is_ignored() {
        let mut vad = scripted(vec![Ok(Some(Boundary::End)), Ok(None)]);
        assert!(vad.process(&window(0.0, 240)).is_none());
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn classifier_failure_keeps_state() {
        let mut vad = scripted(vec![
            Ok(Some(Boundary::Start)),
            Err(Error::Vad("model crashed".to_string())),
            Ok(Some(Boundary::End)),
        ]);

        assert_eq!(vad.process(&window(0.1, 240)), Some(VadEvent::Start));
        assert!(vad.process(&window(0.2, 240)).is_none());
        assert!(vad.is_speaking());

        let Some(VadEvent::End(u)) = vad.process(&window(0.3, 240)) else {
            panic!("expected end");
        };
        // the failed window is still part of the utterance
        assert_eq!(u.samples().len(), 720);
    }

    #[test]
    fn factory_builds_independent_classifiers() {
        let factory = energy_classifier_factory(VadConfig::default());
        let mut a = factory.create();
        let mut b = factory.create();
        assert_eq!(a.classify(&[0.5; 240]).unwrap(), Some(Boundary::Start));
        assert_eq!(b.classify(&[0.5; 240]).unwrap(), Some(Boundary::Start));
    }
}
