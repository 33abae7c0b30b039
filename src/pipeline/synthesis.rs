//! Serial speech synthesis for one turn
//!
//! A single worker pulls chunks off a bounded FIFO and calls the synthesizer
//! one chunk at a time. Every submitted chunk yields exactly one
//! [`SynthesisResult`], with `audio: None` standing in for a failure, and a
//! final [`SynthesisOutput::Finished`] follows once the queue drains.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::voice::{SynthesisRequest, Synthesizer};
use crate::{Error, Result};

use super::segmenter::SentenceChunk;

/// Outcome of synthesizing one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    pub chunk: SentenceChunk,
    /// `None` when synthesis failed or produced nothing
    pub audio: Option<Vec<u8>>,
}

impl SynthesisResult {
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.chunk.seq
    }
}

/// Items on the coordinator's result stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutput {
    Result(SynthesisResult),
    /// All submitted chunks have been processed
    Finished,
}

/// Submission side of the synthesis worker
pub struct SynthesisCoordinator {
    submit_tx: mpsc::Sender<SentenceChunk>,
}

impl SynthesisCoordinator {
    /// Start the worker
    ///
    /// Both queues hold at most `capacity` items; `submit` waits for room.
    #[must_use]
    pub fn spawn(
        synthesizer: Arc<dyn Synthesizer>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<SynthesisOutput>, JoinHandle<()>) {
        let (submit_tx, submit_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);

        let handle = tokio::spawn(run_worker(synthesizer, submit_rx, result_tx, cancel));

        (Self { submit_tx }, result_rx, handle)
    }

    /// Queue a chunk for synthesis
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the worker has stopped
    pub async fn submit(&self, chunk: SentenceChunk) -> Result<()> {
        self.submit_tx
            .send(chunk)
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// No more chunks will be submitted
    pub fn finish(self) {
        drop(self.submit_tx);
    }
}

async fn run_worker(
    synthesizer: Arc<dyn Synthesizer>,
    mut rx: mpsc::Receiver<SentenceChunk>,
    tx: mpsc::Sender<SynthesisOutput>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            chunk = rx.recv() => chunk,
        };

        let Some(chunk) = chunk else {
            tracing::debug!("synthesis queue drained");
            let _ = tx.send(SynthesisOutput::Finished).await;
            return;
        };

        let request = SynthesisRequest::new(chunk.text.clone(), chunk.reference.clone());
        let audio = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            audio = synthesizer.synthesize(&request) => audio,
        };

        let audio = audio.filter(|a| !a.is_empty());
        if audio.is_none() {
            tracing::warn!(seq = chunk.seq, text = %chunk.text, "no audio for chunk, dropping");
        }

        let output = SynthesisOutput::Result(SynthesisResult { chunk, audio });
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = tx.send(output) => sent,
        };
        if sent.is_err() {
            break;
        }
    }

    // pending chunks are discarded with the receiver
    rx.close();
    tracing::debug!(discarded = rx.len(), "synthesis worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// Fails any text containing "fail"; records call order
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Synthesizer for Recording {
        async fn synthesize(&self, request: &SynthesisRequest) -> Option<Vec<u8>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(request.text.clone());
            (!request.text.contains("fail")).then(|| request.text.as_bytes().to_vec())
        }
    }

    fn chunk(seq: u64, text: &str) -> SentenceChunk {
        SentenceChunk {
            seq,
            text: text.to_string(),
            reference: None,
        }
    }

    #[tokio::test]
    async fn results_follow_submission_order() {
        let synth = Arc::new(Recording::default());
        let (coordinator, mut results, handle) =
            SynthesisCoordinator::spawn(synth.clone(), 4, CancellationToken::new());

        for (seq, text) in ["一。", "fail。", "三。"].iter().enumerate() {
            coordinator.submit(chunk(seq as u64, text)).await.unwrap();
        }
        coordinator.finish();

        let mut outputs = Vec::new();
        while let Some(output) = results.recv().await {
            outputs.push(output);
        }
        handle.await.unwrap();

        assert_eq!(outputs.len(), 4);
        let SynthesisOutput::Result(second) = &outputs[1] else {
            panic!("expected result");
        };
        assert_eq!(second.seq(), 1);
        assert!(second.audio.is_none());
        assert_eq!(outputs[3], SynthesisOutput::Finished);
        assert_eq!(*synth.calls.lock().unwrap(), vec!["一。", "fail。", "三。"]);
    }

    #[tokio::test]
    async fn cancellation_stops_worker() {
        let synth = Arc::new(Recording {
            delay: Some(Duration::from_secs(30)),
            ..Recording::default()
        });
        let cancel = CancellationToken::new();
        let (coordinator, mut results, handle) =
            SynthesisCoordinator::spawn(synth.clone(), 4, cancel.clone());

        coordinator.submit(chunk(0, "慢。")).await.unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap();
        assert!(results.recv().await.is_none());
        assert!(synth.calls.lock().unwrap().is_empty());
        assert!(coordinator.submit(chunk(1, "晚。")).await.is_err());
    }
}
