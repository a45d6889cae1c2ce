use crate::error::SessionError;
use async_trait::async_trait;
use rostrum_types::{ServerEvent, SessionState, SessionUpdate};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Receiver half of a room's pub/sub channel.
///
/// Broadcast semantics: a subscriber that falls behind loses the oldest
/// events (`RecvError::Lagged`) rather than blocking the publisher.
pub type EventStream = broadcast::Receiver<ServerEvent>;

/// Ephemeral, TTL-bound key-value store with per-room pub/sub.
///
/// `update` merges partial fields into the existing record and refreshes the
/// TTL; concurrent updates are last-write-wins, acceptable given the coarse,
/// idempotent field semantics documented on [`SessionState`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates or replaces the record for a room and resets its TTL.
    async fn create(&self, state: SessionState) -> Result<(), SessionError>;

    /// Returns the current record, or an error if absent/expired.
    async fn get(&self, room_id: Uuid) -> Result<SessionState, SessionError>;

    /// Merges `update` into the existing record, refreshing the TTL, and
    /// returns the merged state. Fails with `Absent`/`Expired` when there is
    /// no live record to merge into.
    async fn update(
        &self,
        room_id: Uuid,
        update: SessionUpdate,
    ) -> Result<SessionState, SessionError>;

    /// Removes the record and closes the room's pub/sub channel.
    async fn remove(&self, room_id: Uuid) -> Result<(), SessionError>;

    /// Publishes an event to every subscriber of the room. Publishing to a
    /// room with no subscribers is not an error.
    async fn publish(&self, room_id: Uuid, event: ServerEvent) -> Result<(), SessionError>;

    /// Subscribes to the room's event channel, creating it on first use.
    async fn subscribe(&self, room_id: Uuid) -> Result<EventStream, SessionError>;
}
