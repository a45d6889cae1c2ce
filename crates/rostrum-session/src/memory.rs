//! In-process session store backed by a `HashMap` with lazy TTL expiry.

use crate::error::SessionError;
use crate::store::{EventStream, SessionStore};
use async_trait::async_trait;
use rostrum_types::{ServerEvent, SessionState, SessionUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Default session TTL: two hours, matching a long debate with slack.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Capacity of each room's broadcast channel. Audio chunks dominate the
/// event volume; 256 gives a slow subscriber several seconds of slack
/// before it starts lagging.
const ROOM_CHANNEL_CAPACITY: usize = 256;

struct Entry {
    state: SessionState,
    deadline: Instant,
}

/// In-memory [`SessionStore`].
///
/// Expiry is lazy: a record past its deadline is treated as expired on the
/// next access and evicted. Every successful `create`/`update` pushes the
/// deadline out by the full TTL.
#[derive(Clone)]
pub struct MemorySessionStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<ServerEvent>>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender_for(&self, room_id: Uuid) -> broadcast::Sender<ServerEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Evicts an expired record together with its pub/sub channel, so a
    /// long-lived process does not retain one channel per room ever seen.
    async fn evict(&self, entries: &mut HashMap<Uuid, Entry>, room_id: Uuid) {
        entries.remove(&room_id);
        self.channels.write().await.remove(&room_id);
    }

    /// Number of live room channels. Exposed so tests can check that idle
    /// channels are reclaimed.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, state: SessionState) -> Result<(), SessionError> {
        let room_id = state.room_id;
        let mut entries = self.entries.write().await;
        entries.insert(
            room_id,
            Entry {
                state,
                deadline: Instant::now() + self.ttl,
            },
        );
        tracing::debug!(room_id = %room_id, "session record created");
        Ok(())
    }

    async fn get(&self, room_id: Uuid) -> Result<SessionState, SessionError> {
        // Fast path under the read lock; eviction of an expired record takes
        // the write lock separately.
        {
            let entries = self.entries.read().await;
            match entries.get(&room_id) {
                Some(entry) if entry.deadline > Instant::now() => {
                    return Ok(entry.state.clone());
                }
                Some(_) => {}
                None => return Err(SessionError::Absent(room_id)),
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&room_id) {
            if entry.deadline <= Instant::now() {
                self.evict(&mut entries, room_id).await;
                tracing::warn!(room_id = %room_id, "session record expired");
                return Err(SessionError::Expired(room_id));
            }
            return Ok(entry.state.clone());
        }
        Err(SessionError::Absent(room_id))
    }

    async fn update(
        &self,
        room_id: Uuid,
        update: SessionUpdate,
    ) -> Result<SessionState, SessionError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&room_id) {
            Some(entry) if entry.deadline > Instant::now() => {
                update.apply(&mut entry.state);
                entry.deadline = Instant::now() + self.ttl;
                Ok(entry.state.clone())
            }
            Some(_) => {
                self.evict(&mut entries, room_id).await;
                tracing::warn!(room_id = %room_id, "session record expired during update");
                Err(SessionError::Expired(room_id))
            }
            None => Err(SessionError::Absent(room_id)),
        }
    }

    async fn remove(&self, room_id: Uuid) -> Result<(), SessionError> {
        self.entries.write().await.remove(&room_id);
        // Dropping the sender closes every subscriber's stream.
        self.channels.write().await.remove(&room_id);
        tracing::debug!(room_id = %room_id, "session record removed");
        Ok(())
    }

    async fn publish(&self, room_id: Uuid, event: ServerEvent) -> Result<(), SessionError> {
        // Publishing never creates a channel: without one there is nobody
        // listening, and the event would be dropped anyway.
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&room_id) {
            if sender.send(event).is_err() {
                // The last subscriber is gone; reclaim the channel instead
                // of holding it for a room that may never be seen again.
                channels.remove(&room_id);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, room_id: Uuid) -> Result<EventStream, SessionError> {
        Ok(self.sender_for(room_id).await.subscribe())
    }
}
