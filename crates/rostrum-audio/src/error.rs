use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the ingestion buffer.
#[derive(Debug, Error)]
pub enum AudioError {
    /// A flush is already in flight for this room; the buffer is untouched.
    #[error("a flush is already in progress for room {0}")]
    FlushInProgress(Uuid),

    /// The room has no buffered audio to flush.
    #[error("audio buffer for room {0} is empty")]
    EmptyBuffer(Uuid),
}
