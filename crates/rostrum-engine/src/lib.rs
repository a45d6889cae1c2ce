//! The Rostrum streaming session engine.
//!
//! Coordinates one debate turn end to end: the ingestion buffer flushes a
//! complete utterance, the pipeline transcribes it, generates the AI
//! rebuttal, persists both sides, and hands off to the streaming fan-out,
//! which delivers ordered synthesized-audio chunks through the room's
//! pub/sub channel. Exactly one turn is in flight per room at any time.

pub mod error;
pub mod fanout;
pub mod pipeline;
pub mod registry;
pub mod sweeper;

pub use error::{EngineError, TurnPhase};
pub use pipeline::{DebateEngine, EngineConfig, IngestOutcome, TurnOutcome};
pub use registry::StreamRegistry;
pub use sweeper::spawn_timeout_sweeper;

#[cfg(test)]
mod tests;
