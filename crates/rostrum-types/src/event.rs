//! Server-to-client event envelope.
//!
//! Every event delivered over a room's pub/sub channel or directly to a
//! WebSocket client is one of these variants, serialized with a `type` tag
//! matching the wire protocol.

use crate::room::{RoomStatus, TurnOwner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compact view of a persisted utterance carried in `processing_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceSummary {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub processing_secs: Option<f64>,
}

/// Final tally sent with `debate_ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateOutcome {
    pub turns: u32,
    pub duration_secs: f64,
    pub user_arguments: u32,
    pub ai_arguments: u32,
}

/// Events the server emits to clients.
///
/// `ai_audio_chunk.audio_data` is base64-encoded PCM; `None` on the terminal
/// chunk, which carries `total_chunks` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionEstablished {
        room_id: Uuid,
        user_id: String,
        streaming_enabled: bool,
    },
    RoomStatus {
        room_id: Uuid,
        status: RoomStatus,
        current_turn: TurnOwner,
        turn_number: u32,
        is_recording: bool,
        is_streaming: bool,
        speaker: String,
        language: String,
    },
    RecordingStarted {
        user_id: String,
    },
    RecordingStopped,
    AudioBuffering {
        buffer_size: usize,
        duration: f64,
    },
    ProcessingComplete {
        user_message: UtteranceSummary,
        ai_message: UtteranceSummary,
        stream_id: Uuid,
    },
    AiAudioStreamStart {
        stream_id: Uuid,
        text: String,
        estimated_duration: f64,
        speaker: String,
    },
    AiAudioChunk {
        stream_id: Uuid,
        chunk_id: u32,
        audio_data: Option<String>,
        chunk_size: usize,
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_chunks: Option<u32>,
    },
    AiAudioStreamError {
        stream_id: Uuid,
        error: String,
    },
    DebateStarted {
        room_id: Uuid,
        current_turn: TurnOwner,
    },
    DebateEnded {
        room_id: Uuid,
        result: DebateOutcome,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}
