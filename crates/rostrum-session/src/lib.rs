//! Ephemeral session store for Rostrum debate rooms.
//!
//! Holds the TTL-bound [`SessionState`] mirror for each live room and the
//! per-room pub/sub channel the streaming fan-out publishes through. The
//! store is an injected abstraction ([`SessionStore`]) so the server can
//! swap backends and tests can run against the in-memory implementation
//! without a network dependency.

pub mod error;
pub mod memory;
mod store;

pub use error::SessionError;
pub use memory::MemorySessionStore;
pub use store::{EventStream, SessionStore};
