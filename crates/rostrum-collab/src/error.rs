use thiserror::Error;

/// Failures from upstream collaborators.
///
/// Each variant names the collaborator that failed; the turn pipeline maps
/// all of them to its upstream-unavailable outcome.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("transcription error: {0}")]
    Stt(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),
}
