use rostrum_audio::AudioError;
use rostrum_session::SessionError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Where the turn pipeline is in its state machine.
///
/// `Received → Transcribing → Transcribed → Generating → Generated →
/// Streaming → Completed`, with `Failed` reachable from any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Received,
    Transcribing,
    Transcribed,
    Generating,
    Generated,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Received => "received",
            TurnPhase::Transcribing => "transcribing",
            TurnPhase::Transcribed => "transcribed",
            TurnPhase::Generating => "generating",
            TurnPhase::Generated => "generated",
            TurnPhase::Streaming => "streaming",
            TurnPhase::Completed => "completed",
            TurnPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors from the turn pipeline and fan-out.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Buffer conflict: flush already in flight, or nothing to flush.
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Session store failure; absence of the record mid-debate is terminal
    /// for the turn.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("room {0} not found")]
    RoomNotFound(Uuid),

    /// An upstream collaborator (STT, generation, synthesis) failed during
    /// the named phase. The turn is aborted with no turn-number change.
    #[error("upstream failure while {phase}: {message}")]
    Upstream { phase: TurnPhase, message: String },

    /// The bounded end-to-end pipeline deadline elapsed. Equivalent outcome
    /// to an upstream failure.
    #[error("turn pipeline timed out after {0:.0}s")]
    Timeout(f64),

    /// STT produced no usable text; the turn is dropped without persistence.
    #[error("empty transcription")]
    EmptyTranscript,

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    /// True when the failure should be reported to the originating
    /// connection without tearing anything down.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Session(SessionError::Absent(_)))
    }
}
