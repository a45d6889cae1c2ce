use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No record exists for the room (never created, or removed).
    #[error("no session record for room {0}")]
    Absent(Uuid),

    /// The record existed but its TTL elapsed mid-debate. Treated as a
    /// transient store failure: mutations fail loudly rather than guess
    /// stale state.
    #[error("session record for room {0} expired")]
    Expired(Uuid),

    /// Backend failure (lock poisoning, lost connection for a remote
    /// backend, and so on).
    #[error("session store unavailable: {0}")]
    Store(String),
}

impl SessionError {
    /// True for failures a best-effort read may degrade around; mutation
    /// paths must always propagate instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Expired(_) | SessionError::Store(_))
    }
}
