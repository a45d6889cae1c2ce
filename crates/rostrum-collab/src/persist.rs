//! Persistence collaborator for rooms, utterances, and stream analytics.

use crate::error::CollabError;
use async_trait::async_trait;
use chrono::Utc;
use rostrum_types::{Room, RoomStatus, Speaker, TurnOwner, Utterance};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable storage boundary.
///
/// The engine never touches a database directly; rooms and utterances go
/// through this interface so the storage backend stays out of scope for the
/// session engine.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn create_room(&self, room: Room) -> Result<(), CollabError>;

    async fn get_room(&self, room_id: Uuid) -> Result<Room, CollabError>;

    /// Updates room status, stamping `started_at`/`ended_at` on the first
    /// transition into `Active`/`Completed` respectively.
    async fn update_room_status(&self, room_id: Uuid, status: RoomStatus)
        -> Result<Room, CollabError>;

    /// Increments the room's turn counter by one and flips the turn owner,
    /// returning the new turn number.
    async fn advance_turn(&self, room_id: Uuid, owner: TurnOwner) -> Result<u32, CollabError>;

    async fn save_utterance(&self, utterance: Utterance) -> Result<(), CollabError>;

    /// Marks a streamed utterance complete with its final chunk count.
    /// The record is immutable afterwards.
    async fn mark_streaming_complete(
        &self,
        utterance_id: Uuid,
        total_chunks: u32,
    ) -> Result<(), CollabError>;

    /// The most recent `limit` utterances for a room, oldest first.
    async fn recent_utterances(
        &self,
        room_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Utterance>, CollabError>;

    /// Best-effort analytics record for one delivered stream chunk.
    async fn record_chunk(
        &self,
        utterance_id: Uuid,
        seq: u32,
        size: usize,
    ) -> Result<(), CollabError>;

    /// Accumulates speaking time for one side of the debate.
    async fn add_speaking_time(
        &self,
        room_id: Uuid,
        speaker: Speaker,
        secs: f64,
    ) -> Result<(), CollabError>;
}

#[derive(Debug, Clone)]
struct ChunkRecord {
    #[allow(dead_code)]
    utterance_id: Uuid,
    #[allow(dead_code)]
    seq: u32,
    #[allow(dead_code)]
    size: usize,
}

/// In-memory [`Persistence`] used by the default server wiring and by tests.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    utterances: Arc<RwLock<Vec<Utterance>>>,
    chunks: Arc<RwLock<Vec<ChunkRecord>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analytics chunk records, for test assertions.
    pub async fn chunk_record_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// All utterances for a room in insertion order, for test assertions.
    pub async fn utterances_for(&self, room_id: Uuid) -> Vec<Utterance> {
        self.utterances
            .read()
            .await
            .iter()
            .filter(|u| u.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn create_room(&self, room: Room) -> Result<(), CollabError> {
        self.rooms.write().await.insert(room.id, room);
        Ok(())
    }

    async fn get_room(&self, room_id: Uuid) -> Result<Room, CollabError> {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .cloned()
            .ok_or_else(|| CollabError::NotFound(format!("room {}", room_id)))
    }

    async fn update_room_status(
        &self,
        room_id: Uuid,
        status: RoomStatus,
    ) -> Result<Room, CollabError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&room_id)
            .ok_or_else(|| CollabError::NotFound(format!("room {}", room_id)))?;

        room.status = status;
        if status == RoomStatus::Active && room.started_at.is_none() {
            room.started_at = Some(Utc::now());
        }
        if status == RoomStatus::Completed && room.ended_at.is_none() {
            room.ended_at = Some(Utc::now());
        }
        Ok(room.clone())
    }

    async fn advance_turn(&self, room_id: Uuid, owner: TurnOwner) -> Result<u32, CollabError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&room_id)
            .ok_or_else(|| CollabError::NotFound(format!("room {}", room_id)))?;
        room.turn_number += 1;
        room.current_turn = owner;
        Ok(room.turn_number)
    }

    async fn save_utterance(&self, utterance: Utterance) -> Result<(), CollabError> {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(room) = rooms.get_mut(&utterance.room_id) {
                match utterance.speaker {
                    Speaker::User => room.user_argument_count += 1,
                    Speaker::Ai => room.ai_argument_count += 1,
                    Speaker::System => {}
                }
            }
        }
        self.utterances.write().await.push(utterance);
        Ok(())
    }

    async fn mark_streaming_complete(
        &self,
        utterance_id: Uuid,
        total_chunks: u32,
    ) -> Result<(), CollabError> {
        let mut utterances = self.utterances.write().await;
        let utterance = utterances
            .iter_mut()
            .find(|u| u.id == utterance_id)
            .ok_or_else(|| CollabError::NotFound(format!("utterance {}", utterance_id)))?;

        if utterance.streaming_completed {
            return Err(CollabError::Persistence(format!(
                "utterance {} already completed streaming",
                utterance_id
            )));
        }
        utterance.stream_chunk_count = total_chunks;
        utterance.streaming_completed = true;
        Ok(())
    }

    async fn recent_utterances(
        &self,
        room_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Utterance>, CollabError> {
        let utterances = self.utterances.read().await;
        let mut recent: Vec<Utterance> = utterances
            .iter()
            .filter(|u| u.room_id == room_id)
            .rev()
            .take(limit)
            .cloned()
            .collect();
        recent.reverse(); // back to chronological order
        Ok(recent)
    }

    async fn record_chunk(
        &self,
        utterance_id: Uuid,
        seq: u32,
        size: usize,
    ) -> Result<(), CollabError> {
        self.chunks.write().await.push(ChunkRecord {
            utterance_id,
            seq,
            size,
        });
        Ok(())
    }

    async fn add_speaking_time(
        &self,
        room_id: Uuid,
        speaker: Speaker,
        secs: f64,
    ) -> Result<(), CollabError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&room_id)
            .ok_or_else(|| CollabError::NotFound(format!("room {}", room_id)))?;
        match speaker {
            Speaker::User => room.user_speaking_secs += secs,
            Speaker::Ai => room.ai_speaking_secs += secs,
            Speaker::System => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostrum_types::{Stance, UtteranceKind};

    fn room() -> Room {
        Room::new("u1", "Topic", Stance::For, "en-IN", "anushka")
    }

    #[tokio::test]
    async fn advance_turn_increments_and_flips_owner() {
        let store = MemoryPersistence::new();
        let r = room();
        let id = r.id;
        store.create_room(r).await.unwrap();

        assert_eq!(store.advance_turn(id, TurnOwner::Ai).await.unwrap(), 1);
        assert_eq!(store.advance_turn(id, TurnOwner::Ai).await.unwrap(), 2);
        let room = store.get_room(id).await.unwrap();
        assert_eq!(room.turn_number, 2);
        assert_eq!(room.current_turn, TurnOwner::Ai);
    }

    #[tokio::test]
    async fn status_transition_stamps_timestamps_once() {
        let store = MemoryPersistence::new();
        let r = room();
        let id = r.id;
        store.create_room(r).await.unwrap();

        let active = store.update_room_status(id, RoomStatus::Active).await.unwrap();
        let started = active.started_at.expect("started_at stamped");

        // A second transition into Active must not move the stamp.
        let again = store.update_room_status(id, RoomStatus::Active).await.unwrap();
        assert_eq!(again.started_at, Some(started));

        let done = store
            .update_room_status(id, RoomStatus::Completed)
            .await
            .unwrap();
        assert!(done.ended_at.is_some());
    }

    #[tokio::test]
    async fn recent_utterances_are_chronological_and_bounded() {
        let store = MemoryPersistence::new();
        let r = room();
        let id = r.id;
        store.create_room(r).await.unwrap();

        for i in 0..8 {
            store
                .save_utterance(Utterance::new(
                    id,
                    Speaker::User,
                    UtteranceKind::Argument,
                    format!("m{}", i),
                    i,
                ))
                .await
                .unwrap();
        }

        let recent = store.recent_utterances(id, 5).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4", "m5", "m6", "m7"]);
    }

    #[tokio::test]
    async fn completed_stream_is_immutable() {
        let store = MemoryPersistence::new();
        let r = room();
        let room_id = r.id;
        store.create_room(r).await.unwrap();

        let placeholder =
            Utterance::new(room_id, Speaker::Ai, UtteranceKind::Rebuttal, "reb", 1)
                .streaming_placeholder();
        let uid = placeholder.id;
        store.save_utterance(placeholder).await.unwrap();

        store.mark_streaming_complete(uid, 12).await.unwrap();
        let err = store.mark_streaming_complete(uid, 13).await.unwrap_err();
        assert!(matches!(err, CollabError::Persistence(_)));

        let saved = store.utterances_for(room_id).await;
        assert_eq!(saved[0].stream_chunk_count, 12);
        assert!(saved[0].streaming_completed);
    }

    #[tokio::test]
    async fn speaking_time_accumulates_per_side() {
        let store = MemoryPersistence::new();
        let r = room();
        let id = r.id;
        store.create_room(r).await.unwrap();

        store.add_speaking_time(id, Speaker::User, 2.5).await.unwrap();
        store.add_speaking_time(id, Speaker::User, 1.0).await.unwrap();
        store.add_speaking_time(id, Speaker::Ai, 4.0).await.unwrap();

        let room = store.get_room(id).await.unwrap();
        assert!((room.user_speaking_secs - 3.5).abs() < 1e-9);
        assert!((room.ai_speaking_secs - 4.0).abs() < 1e-9);
    }
}
