//! One conversation turn: model → segmenter → synthesis → multiplexer

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::llm::{ChatMessage, LanguageModel};
use crate::voice::Synthesizer;

use super::events::PipelineEvent;
use super::multiplexer::{StreamMultiplexer, TextSignal};
use super::observer::TurnObserver;
use super::segmenter::{EllipsisFolder, SegmenterState, SentenceChunk, SentenceSegmenter};
use super::synthesis::SynthesisCoordinator;

/// Shared collaborators for starting turns
#[derive(Clone)]
pub struct TurnPipeline {
    llm: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn Synthesizer>,
    segmenter: SentenceSegmenter,
    observer: Arc<dyn TurnObserver>,
    config: PipelineConfig,
}

impl TurnPipeline {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn Synthesizer>,
        segmenter: SentenceSegmenter,
        observer: Arc<dyn TurnObserver>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            llm,
            synthesizer,
            segmenter,
            observer,
            config,
        }
    }

    /// Start a turn replying to `messages`
    #[must_use]
    pub fn start(&self, messages: Vec<ChatMessage>) -> Turn {
        self.start_with(Arc::clone(&self.llm), messages)
    }

    /// Start a turn driven by a specific model
    #[must_use]
    pub fn start_with(&self, llm: Arc<dyn LanguageModel>, messages: Vec<ChatMessage>) -> Turn {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let capacity = self.config.queue_capacity;

        let (text_tx, text_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let (coordinator, audio_rx, _worker) =
            SynthesisCoordinator::spawn(Arc::clone(&self.synthesizer), capacity, cancel.clone());

        let driver = TextDriver {
            llm,
            segmenter: self.segmenter.clone(),
            coordinator,
            text_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(messages));

        let multiplexer = StreamMultiplexer::new(
            text_rx,
            audio_rx,
            events_tx,
            Arc::clone(&self.observer),
            cancel.clone(),
            self.config.poll_interval,
        );
        tokio::spawn(async move {
            let outcome = multiplexer.run().await;
            tracing::debug!(turn = %id, ?outcome, "turn finished");
        });

        tracing::info!(turn = %id, "turn started");

        Turn {
            id,
            events: events_rx,
            cancel: cancel.clone(),
            guard: cancel.drop_guard(),
        }
    }
}

/// Handle to a running turn
///
/// Dropping the handle cancels the turn and every outstanding collaborator
/// call.
pub struct Turn {
    id: Uuid,
    events: mpsc::Receiver<PipelineEvent>,
    cancel: CancellationToken,
    guard: DropGuard,
}

impl Turn {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the turn has ended
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Abort the turn
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observing this turn's cancellation
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Turn events as a stream; dropping the stream cancels the turn
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let Self { events, guard, .. } = self;
        ReceiverStream::new(events).map(move |event| {
            let _held = &guard;
            event
        })
    }
}

/// Feeds model output through the segmenter into synthesis
struct TextDriver {
    llm: Arc<dyn LanguageModel>,
    segmenter: SentenceSegmenter,
    coordinator: SynthesisCoordinator,
    text_tx: mpsc::Sender<TextSignal>,
    cancel: CancellationToken,
}

impl TextDriver {
    async fn run(self, messages: Vec<ChatMessage>) {
        let started = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            started = self.llm.stream_chat(&messages) => started,
        };

        let mut deltas = match started {
            Ok(deltas) => deltas,
            Err(e) => {
                self.fail(&e.to_string()).await;
                return;
            }
        };

        let mut state = SegmenterState::new();
        let mut ellipsis = EllipsisFolder::new();
        let mut first_delta = true;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                next = deltas.next() => next,
            };

            let delta = match next {
                None => break,
                Some(Ok(delta)) => delta,
                Some(Err(e)) if e.kind() == ErrorKind::ParseFailure => {
                    tracing::warn!(error = %e, "skipping malformed model fragment");
                    continue;
                }
                Some(Err(e)) => {
                    self.fail(&e.to_string()).await;
                    return;
                }
            };

            if first_delta {
                tracing::debug!("first model delta");
                first_delta = false;
            }

            if !self.release(ellipsis.push(&delta), &mut state).await {
                return;
            }
        }

        if !self.release(ellipsis.finish(), &mut state).await {
            return;
        }
        if let Some(chunk) = self.segmenter.flush(&mut state)
            && !self.forward(chunk).await
        {
            return;
        }

        tracing::debug!(chunks = state.next_seq(), "model stream finished");
        let Self {
            coordinator,
            text_tx,
            ..
        } = self;
        coordinator.finish();
        let _ = text_tx.send(TextSignal::Finished).await;
    }

    /// Echo folded text to the client and queue every chunk it completes
    async fn release(&self, text: String, state: &mut SegmenterState) -> bool {
        if text.is_empty() {
            return true;
        }
        let chunks = self.segmenter.drain(&text, state);
        if self.text_tx.send(TextSignal::Delta(text)).await.is_err() {
            return false;
        }
        for chunk in chunks {
            if !self.forward(chunk).await {
                return false;
            }
        }
        true
    }

    /// Announce a chunk to the multiplexer, then queue it for synthesis
    async fn forward(&self, chunk: SentenceChunk) -> bool {
        let announced = self
            .text_tx
            .send(TextSignal::Chunk {
                seq: chunk.seq,
                text: chunk.text.clone(),
            })
            .await;
        if announced.is_err() {
            return false;
        }

        // waits for queue room when synthesis falls behind
        self.coordinator.submit(chunk).await.is_ok()
    }

    async fn fail(&self, message: &str) {
        tracing::error!(error = %message, "model stream failed");
        let _ = self.text_tx.send(TextSignal::Failed(message.to_string())).await;
    }
}
