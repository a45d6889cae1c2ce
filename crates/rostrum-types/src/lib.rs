//! Shared types for the Rostrum debate platform.
//!
//! Pure data: rooms, session state, utterances, stream chunks, and the
//! WebSocket event envelope. No I/O lives here so every other crate can
//! depend on these types without pulling in runtime machinery.

pub mod event;
pub mod room;
pub mod session;
pub mod utterance;

pub use event::{DebateOutcome, ServerEvent, UtteranceSummary};
pub use room::{Room, RoomStatus, Stance, TurnOwner};
pub use session::{SessionState, SessionUpdate};
pub use utterance::{Speaker, StreamChunk, Utterance, UtteranceKind};
