//! Debate room model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a debate room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Active,
    Paused,
    Completed,
    Error,
}

/// Which side holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOwner {
    User,
    Ai,
}

/// Debate stance on the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    For,
    Against,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::For => "for",
            Stance::Against => "against",
        }
    }
}

/// One debate session between a user and the AI opponent.
///
/// Created when the user requests a session, mutated by the gateway and the
/// turn pipeline, and retired (status `Completed`, never deleted) when the
/// debate ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// Owning user; only this identity may connect.
    pub user_id: String,
    /// Debate topic title, resolved by the caller that created the room.
    pub topic: String,
    pub user_stance: Stance,
    pub ai_stance: Stance,
    /// BCP 47 language tag used for STT, generation, and TTS.
    pub language: String,
    /// Synthetic voice name passed to the synthesizer.
    pub ai_voice: String,
    pub status: RoomStatus,
    pub current_turn: TurnOwner,
    /// Monotonic turn counter; advances by exactly one per completed
    /// user + AI exchange.
    pub turn_number: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Cumulative speaking time in seconds, per side.
    pub user_speaking_secs: f64,
    pub ai_speaking_secs: f64,
    /// Argument counters, per side.
    pub user_argument_count: u32,
    pub ai_argument_count: u32,
}

impl Room {
    /// Creates a room in the `Waiting` state owned by `user_id`.
    pub fn new(
        user_id: impl Into<String>,
        topic: impl Into<String>,
        user_stance: Stance,
        language: impl Into<String>,
        ai_voice: impl Into<String>,
    ) -> Self {
        let ai_stance = match user_stance {
            Stance::For => Stance::Against,
            Stance::Against => Stance::For,
        };
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            topic: topic.into(),
            user_stance,
            ai_stance,
            language: language.into(),
            ai_voice: ai_voice.into(),
            status: RoomStatus::Waiting,
            current_turn: TurnOwner::User,
            turn_number: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            user_speaking_secs: 0.0,
            ai_speaking_secs: 0.0,
            user_argument_count: 0,
            ai_argument_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}
