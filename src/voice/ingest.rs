//! Rolling accumulation of transport audio into detection windows

use crate::Result;

use super::wav::pcm16_from_bytes;

/// Divisor mapping i16 samples into [-1, 1)
const PCM16_SCALE: f32 = 32768.0;

/// A block of 16 kHz mono PCM16 samples as received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap already-decoded samples
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Decode a frame from little-endian PCM16 bytes
    ///
    /// # Errors
    ///
    /// Returns a decode error if the byte count is odd
    pub fn from_pcm16_bytes(bytes: &[u8]) -> Result<Self> {
        pcm16_from_bytes(bytes).map(Self::new)
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Float samples in [-1, 1] ready for the speech classifier
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWindow {
    samples: Vec<f32>,
}

impl NormalizedWindow {
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the window, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl From<Vec<f32>> for NormalizedWindow {
    fn from(samples: Vec<f32>) -> Self {
        Self { samples }
    }
}

/// Buffers frames until enough samples exist to make detection worthwhile
///
/// No resampling happens here: callers must deliver 16 kHz mono audio.
#[derive(Debug)]
pub struct AudioIngestWindow {
    pending: Vec<i16>,
    min_samples: usize,
}

impl AudioIngestWindow {
    /// Create a window that releases once `min_samples` have accumulated
    #[must_use]
    pub const fn new(min_samples: usize) -> Self {
        Self {
            pending: Vec::new(),
            min_samples,
        }
    }

    /// Append a frame to the accumulator
    pub fn push(&mut self, frame: &AudioFrame) {
        self.pending.extend_from_slice(frame.samples());
    }

    /// Release the accumulated samples as a normalized window
    ///
    /// Returns `None` and keeps buffering while below the threshold.
    pub fn try_take_window(&mut self) -> Option<NormalizedWindow> {
        if self.pending.len() < self.min_samples {
            return None;
        }

        let samples = self
            .pending
            .drain(..)
            .map(|s| f32::from(s) / PCM16_SCALE)
            .collect();

        Some(NormalizedWindow { samples })
    }

    /// Samples waiting for the threshold
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Discard buffered samples
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
