//! Utterance assembly and the per-connection listening session

use std::sync::Arc;

use crate::config::{SAMPLE_RATE, VadConfig};
use crate::Result;

use super::ingest::{AudioFrame, AudioIngestWindow};
use super::stt::Transcriber;
use super::vad::{SpeechClassifier, Utterance, VadEvent, VoiceActivityDetector};
use super::wav::samples_to_wav;

/// Hands sealed utterances to the ASR collaborator
#[derive(Clone)]
pub struct UtteranceAssembler {
    transcriber: Arc<dyn Transcriber>,
}

impl UtteranceAssembler {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }

    /// Encode the utterance as WAV and transcribe it
    ///
    /// Returns `None` when the recognizer heard nothing. Failures are not
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails or the recognizer is unavailable
    pub async fn assemble(&self, utterance: &Utterance) -> Result<Option<String>> {
        let wav = samples_to_wav(utterance.samples(), SAMPLE_RATE)?;
        tracing::debug!(
            duration_ms = utterance.duration_ms(),
            wav_bytes = wav.len(),
            "utterance sealed"
        );

        let transcript = self.transcriber.transcribe(&wav).await?;
        Ok(transcript.filter(|t| !t.trim().is_empty()))
    }
}

/// Ingest, detection and transcription for one client connection
///
/// Frames are processed strictly in order: the next window is not examined
/// until the transcription for the previous utterance has returned.
pub struct ListenSession {
    ingest: AudioIngestWindow,
    vad: VoiceActivityDetector,
    assembler: UtteranceAssembler,
}

impl ListenSession {
    #[must_use]
    pub fn new(
        classifier: Box<dyn SpeechClassifier>,
        config: &VadConfig,
        assembler: UtteranceAssembler,
    ) -> Self {
        Self {
            ingest: AudioIngestWindow::new(config.min_window_samples),
            vad: VoiceActivityDetector::new(classifier, config),
            assembler,
        }
    }

    /// Feed raw PCM16 bytes, returning a transcript if an utterance closed
    ///
    /// # Errors
    ///
    /// Returns a decode error for malformed PCM (the frame is dropped and the
    /// session stays usable) or the recognizer's error for a closed utterance
    pub async fn push_pcm(&mut self, bytes: &[u8]) -> Result<Option<String>> {
        let frame = AudioFrame::from_pcm16_bytes(bytes)?;
        self.push_frame(&frame).await
    }

    /// Feed one decoded frame
    ///
    /// # Errors
    ///
    /// Returns the recognizer's error if an utterance closed and failed
    pub async fn push_frame(&mut self, frame: &AudioFrame) -> Result<Option<String>> {
        self.ingest.push(frame);
        let Some(window) = self.ingest.try_take_window() else {
            return Ok(None);
        };

        match self.vad.process(&window) {
            Some(VadEvent::End(utterance)) => self.assembler.assemble(&utterance).await,
            Some(VadEvent::Start | VadEvent::Continue) | None => Ok(None),
        }
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.vad.is_speaking()
    }

    /// Drop buffered audio and any open utterance
    pub fn reset(&mut self) {
        self.ingest.clear();
        self.vad.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::voice::vad::EnergyClassifier;

    struct Counting {
        calls: AtomicUsize,
        reply: Option<String>,
    }

    #[async_trait]
    impl Transcriber for Counting {
        async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
            assert_eq!(&wav[0..4], b"RIFF");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn session(reply: Option<&str>) -> (ListenSession, Arc<Counting>) {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: reply.map(str::to_string),
        });
        let config = VadConfig::default();
        let session = ListenSession::new(
            Box::new(EnergyClassifier::new(&config)),
            &config,
            UtteranceAssembler::new(counting.clone()),
        );
        (session, counting)
    }

    async fn feed(session: &mut ListenSession, amplitude: i16, frames: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..frames {
            let frame = AudioFrame::new(vec![amplitude; 320]);
            if let Some(text) = session.push_frame(&frame).await.unwrap() {
                out.push(text);
            }
        }
        out
    }

    #[tokio::test]
    async fn one_utterance_one_transcript() {
        let (mut session, counting) = session(Some("你好"));
        assert!(feed(&mut session, 0, 20).await.is_empty());
        assert!(feed(&mut session, 8000, 20).await.is_empty());
        assert!(session.is_speaking());
        let transcripts = feed(&mut session, 0, 20).await;

        assert_eq!(transcripts, vec!["你好".to_string()]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_transcript_is_none() {
        let (mut session, counting) = session(Some("  "));
        feed(&mut session, 8000, 5).await;
        assert!(feed(&mut session, 0, 20).await.is_empty());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_pcm_keeps_session() {
        let (mut session, _) = session(None);
        assert!(session.push_pcm(&[1, 2, 3]).await.is_err());
        assert!(session.push_pcm(&[0; 640]).await.unwrap().is_none());
    }
}
