//! Ephemeral per-room session state.

use crate::room::{RoomStatus, TurnOwner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// TTL-bound mirror of a room's live state, held in the session store.
///
/// All fields have coarse, idempotent merge semantics: concurrent partial
/// updates are last-write-wins, which is acceptable because the only
/// mutual-exclusion points are the audio buffer's processing flag and
/// `is_streaming` (both toggled from exactly one task at a time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub room_id: Uuid,
    pub status: RoomStatus,
    pub current_turn: TurnOwner,
    pub turn_number: u32,
    pub is_recording: bool,
    pub is_streaming: bool,
    pub active_stream_id: Option<Uuid>,
    pub connection_count: u32,
    pub last_updated: DateTime<Utc>,
}

impl SessionState {
    /// Fresh state for a newly created room.
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            status: RoomStatus::Waiting,
            current_turn: TurnOwner::User,
            turn_number: 0,
            is_recording: false,
            is_streaming: false,
            active_stream_id: None,
            connection_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Partial update merged into a [`SessionState`] record.
///
/// `active_stream_id` uses a doubled `Option` so callers can distinguish
/// "leave unchanged" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<RoomStatus>,
    pub current_turn: Option<TurnOwner>,
    pub turn_number: Option<u32>,
    pub is_recording: Option<bool>,
    pub is_streaming: Option<bool>,
    pub active_stream_id: Option<Option<Uuid>>,
    pub connection_delta: i32,
}

impl SessionUpdate {
    pub fn apply(&self, state: &mut SessionState) {
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(turn) = self.current_turn {
            state.current_turn = turn;
        }
        if let Some(n) = self.turn_number {
            state.turn_number = n;
        }
        if let Some(rec) = self.is_recording {
            state.is_recording = rec;
        }
        if let Some(streaming) = self.is_streaming {
            state.is_streaming = streaming;
        }
        if let Some(stream_id) = self.active_stream_id {
            state.active_stream_id = stream_id;
        }
        if self.connection_delta != 0 {
            let count = state.connection_count as i64 + self.connection_delta as i64;
            state.connection_count = count.max(0) as u32;
        }
        state.last_updated = Utc::now();
    }
}
