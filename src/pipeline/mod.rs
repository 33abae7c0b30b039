//! Conversation turn pipeline
//!
//! Streams a model reply as text while synthesizing it sentence by
//! sentence, and merges both into a single ordered event stream.

pub mod emotion;
pub mod events;
pub mod multiplexer;
pub mod observer;
pub mod segmenter;
pub mod synthesis;
pub mod turn;

pub use emotion::EmotionTable;
pub use events::{PipelineEvent, WireEvent};
pub use multiplexer::{StreamMultiplexer, TextSignal, TurnOutcome};
pub use observer::{LoggingObserver, TurnObserver, WebhookObserver, observer_for};
pub use segmenter::{EllipsisFolder, SegmenterState, SentenceChunk, SentenceSegmenter};
pub use synthesis::{SynthesisCoordinator, SynthesisOutput, SynthesisResult};
pub use turn::{Turn, TurnPipeline};
