//! Registry of active fan-out streams with deterministic cancellation.
//!
//! Every spawned fan-out task registers here before its first chunk, so a
//! `stop_ai_stream` request (or debate teardown) can cancel it by stream id
//! instead of relying on an orphaned task to notice on its own.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

struct StreamHandle {
    room_id: Uuid,
    cancel: watch::Sender<bool>,
}

/// Active streams keyed by stream id.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<Mutex<HashMap<Uuid, StreamHandle>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream and returns the cancellation receiver its fan-out
    /// task selects on.
    pub async fn register(&self, stream_id: Uuid, room_id: Uuid) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.inner.lock().await.insert(
            stream_id,
            StreamHandle {
                room_id,
                cancel: tx,
            },
        );
        rx
    }

    /// Signals cancellation for one stream. Returns false if the stream is
    /// unknown (already finished or never existed).
    pub async fn cancel(&self, stream_id: Uuid) -> bool {
        let inner = self.inner.lock().await;
        match inner.get(&stream_id) {
            Some(handle) => handle.cancel.send(true).is_ok(),
            None => false,
        }
    }

    /// Cancels every stream belonging to a room; returns how many were
    /// signalled.
    pub async fn cancel_room(&self, room_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner
            .values()
            .filter(|h| h.room_id == room_id)
            .filter(|h| h.cancel.send(true).is_ok())
            .count()
    }

    /// Removes a finished stream's handle.
    pub async fn remove(&self, stream_id: Uuid) {
        self.inner.lock().await.remove(&stream_id);
    }

    /// The active stream for a room, if any. At most one exists by the
    /// one-turn-in-flight invariant.
    pub async fn active_for_room(&self, room_id: Uuid) -> Option<Uuid> {
        let inner = self.inner.lock().await;
        inner
            .iter()
            .find(|(_, h)| h.room_id == room_id)
            .map(|(id, _)| *id)
    }
}
