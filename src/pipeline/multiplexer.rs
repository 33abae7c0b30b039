//! Merges a turn's text and audio streams into one ordered event stream

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::PipelineEvent;
use super::observer::TurnObserver;
use super::synthesis::{SynthesisOutput, SynthesisResult};

/// Messages from the text side of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSignal {
    /// Model output to echo to the client
    Delta(String),
    /// A chunk was submitted for synthesis
    Chunk { seq: u64, text: String },
    /// The model stream ended normally
    Finished,
    /// The model failed; the turn must abort
    Failed(String),
}

/// How a multiplexed turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { full_text: String },
    Failed { message: String },
    Cancelled,
}

/// Per-turn merge of text and audio
pub struct StreamMultiplexer {
    text_rx: mpsc::Receiver<TextSignal>,
    audio_rx: mpsc::Receiver<SynthesisOutput>,
    events: mpsc::Sender<PipelineEvent>,
    observer: Arc<dyn TurnObserver>,
    cancel: CancellationToken,
    poll_interval: Duration,

    /// Submitted chunks still waiting for their audio, by seq
    pending: BTreeMap<u64, String>,
    full_text: String,
    last_audio_seq: Option<u64>,
}

enum Step {
    Text(Option<TextSignal>),
    Audio(Option<SynthesisOutput>),
    Tick,
    Cancelled,
}

impl StreamMultiplexer {
    #[must_use]
    pub fn new(
        text_rx: mpsc::Receiver<TextSignal>,
        audio_rx: mpsc::Receiver<SynthesisOutput>,
        events: mpsc::Sender<PipelineEvent>,
        observer: Arc<dyn TurnObserver>,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            text_rx,
            audio_rx,
            events,
            observer,
            cancel,
            poll_interval,
            pending: BTreeMap::new(),
            full_text: String::new(),
            last_audio_seq: None,
        }
    }

    /// Drive the turn to completion
    ///
    /// Text and audio are forwarded as soon as either is available. The
    /// turn completes once both sides report they are finished. A model
    /// failure emits an `Error` event and cancels the turn; a closed
    /// outbound channel cancels it silently.
    pub async fn run(mut self) -> TurnOutcome {
        let mut text_done = false;
        let mut audio_done = false;

        while !(text_done && audio_done) {
            // text first: a chunk's announcement always precedes its audio
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Cancelled,
                signal = self.text_rx.recv(), if !text_done => Step::Text(signal),
                output = self.audio_rx.recv(), if !audio_done => Step::Audio(output),
                () = tokio::time::sleep(self.poll_interval) => Step::Tick,
            };

            match step {
                Step::Cancelled => return self.cancelled(),
                Step::Tick => {
                    if self.events.is_closed() {
                        return self.disconnected();
                    }
                }
                Step::Text(Some(TextSignal::Delta(delta))) => {
                    self.full_text.push_str(&delta);
                    if !self.emit(PipelineEvent::TextDelta(delta)).await {
                        return self.disconnected();
                    }
                }
                Step::Text(Some(TextSignal::Chunk { seq, text })) => {
                    self.pending.insert(seq, text);
                }
                Step::Text(Some(TextSignal::Finished) | None) => text_done = true,
                Step::Text(Some(TextSignal::Failed(message))) => {
                    tracing::error!(error = %message, "turn aborted");
                    self.cancel.cancel();
                    let _ = self
                        .events
                        .send(PipelineEvent::Error {
                            message: message.clone(),
                        })
                        .await;
                    return TurnOutcome::Failed { message };
                }
                Step::Audio(Some(SynthesisOutput::Result(result))) => {
                    if !self.forward_audio(result).await {
                        return self.disconnected();
                    }
                }
                Step::Audio(Some(SynthesisOutput::Finished) | None) => audio_done = true,
            }
        }

        if !self.pending.is_empty() {
            tracing::warn!(unpaired = self.pending.len(), "chunks finished without a result");
        }

        let full_text = std::mem::take(&mut self.full_text);
        let complete = PipelineEvent::TurnComplete {
            full_text: full_text.clone(),
        };
        if !self.emit(complete).await {
            return self.disconnected();
        }

        self.observer.turn_completed(&full_text).await;
        TurnOutcome::Completed { full_text }
    }

    /// Pair a result with its display text by seq and emit it if it has audio
    async fn forward_audio(&mut self, result: SynthesisResult) -> bool {
        let seq = result.seq();

        if self.last_audio_seq.is_some_and(|last| seq <= last) {
            tracing::warn!(seq, last = ?self.last_audio_seq, "synthesis result out of order");
        }
        self.last_audio_seq = Some(seq);

        let paired_text = self.pending.remove(&seq).unwrap_or_else(|| {
            tracing::warn!(seq, "result for unannounced chunk");
            result.chunk.text.clone()
        });

        let Some(audio) = result.audio else {
            tracing::debug!(seq, "skipping failed chunk");
            return true;
        };

        self.emit(PipelineEvent::AudioReady {
            seq,
            audio,
            paired_text,
        })
        .await
    }

    /// Send one event; gives up once the turn is cancelled or the client is gone
    async fn emit(&self, event: PipelineEvent) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    fn disconnected(&self) -> TurnOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled();
        }
        tracing::info!("client gone, cancelling turn");
        self.cancel.cancel();
        TurnOutcome::Cancelled
    }

    fn cancelled(&self) -> TurnOutcome {
        tracing::debug!("turn cancelled");
        TurnOutcome::Cancelled
    }
}
