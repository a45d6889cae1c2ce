//! Persisted utterances and transient stream chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Ai,
    System,
}

/// Rhetorical role of an utterance within the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceKind {
    Argument,
    Rebuttal,
    Opening,
    Closing,
    System,
}

/// One persisted unit of spoken or transcribed content.
///
/// Created by the turn pipeline and saved through the persistence
/// collaborator. Immutable once `streaming_completed` is true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub id: Uuid,
    pub room_id: Uuid,
    pub speaker: Speaker,
    pub kind: UtteranceKind,
    pub text: String,
    pub turn_number: u32,
    /// True for AI utterances delivered as a chunked audio stream.
    pub is_streamed: bool,
    pub stream_chunk_count: u32,
    pub streaming_completed: bool,
    pub created_at: DateTime<Utc>,
    /// Estimated audio duration in seconds, when known.
    pub audio_secs: Option<f64>,
    /// Wall-clock time the producing step took (STT or generation).
    pub processing_secs: Option<f64>,
    pub confidence: Option<f64>,
    /// 1-10 argument quality score, filled in by later analysis.
    pub quality: Option<u8>,
}

impl Utterance {
    pub fn new(
        room_id: Uuid,
        speaker: Speaker,
        kind: UtteranceKind,
        text: impl Into<String>,
        turn_number: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            speaker,
            kind,
            text: text.into(),
            turn_number,
            is_streamed: false,
            stream_chunk_count: 0,
            streaming_completed: true,
            created_at: Utc::now(),
            audio_secs: None,
            processing_secs: None,
            confidence: None,
            quality: None,
        }
    }

    /// Marks this utterance as a streaming placeholder: the audio is still
    /// being delivered, so the record is mutable until the stream finishes.
    pub fn streaming_placeholder(mut self) -> Self {
        self.is_streamed = true;
        self.streaming_completed = false;
        self
    }
}

/// One ordered unit of synthesized audio within a stream.
///
/// Exists only transiently as fan-out output; sequence numbers start at 1
/// and increase without gaps for a given stream id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub stream_id: Uuid,
    pub seq: u32,
    /// Raw synthesized audio; base64-encoded at the wire boundary.
    pub payload: Vec<u8>,
    pub is_final: bool,
}
