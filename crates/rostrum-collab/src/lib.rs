//! Upstream collaborator interfaces and providers.
//!
//! The turn pipeline treats speech-to-text, rebuttal generation, streaming
//! speech synthesis, and persistence as black-box collaborators behind
//! async traits, so the engine can be exercised in tests with in-process
//! fakes and wired to real providers in production.
//!
//! Shipped providers: a whisper.cpp-style subprocess transcriber, a
//! piper-style subprocess synthesizer that yields raw PCM incrementally,
//! an OpenAI-compatible HTTP rebuttal generator, and an in-memory
//! persistence store.

pub mod error;
pub mod generate;
pub mod persist;
pub mod synth;
pub mod transcribe;

pub use error::CollabError;
pub use generate::{HttpRebuttalGenerator, RebuttalGenerator, RebuttalRequest};
pub use persist::{MemoryPersistence, Persistence};
pub use synth::{ProcessSynthesizer, SpeechSynthesizer, SynthesisStream};
pub use transcribe::{ProcessTranscriber, Transcriber};
