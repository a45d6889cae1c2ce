//! Audio ingestion buffering and voice-activity heuristics.
//!
//! Each room accumulates raw PCM frames until one of the flush triggers
//! fires, at which point the buffered utterance is handed to the turn
//! pipeline in one piece. The heuristics are an RMS silence check plus
//! duration/size/inactivity bounds; every constant is configurable policy
//! rather than a fixed algorithm.

pub mod buffer;
pub mod error;
pub mod vad;

pub use buffer::{AudioIngest, BufferStatus, FlushTrigger, FlushedUtterance};
pub use error::AudioError;
pub use vad::{is_silent, VadConfig};
