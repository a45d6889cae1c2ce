//! The turn pipeline: transcribe → generate → persist → stream handoff.

use crate::error::{EngineError, TurnPhase};
use crate::fanout::{self, StreamJob};
use crate::registry::StreamRegistry;
use rostrum_audio::{AudioIngest, FlushedUtterance};
use rostrum_collab::{
    CollabError, Persistence, RebuttalGenerator, RebuttalRequest, SpeechSynthesizer, Transcriber,
};
use rostrum_session::SessionStore;
use rostrum_types::{
    DebateOutcome, Room, RoomStatus, ServerEvent, SessionUpdate, Speaker, TurnOwner, Utterance,
    UtteranceKind, UtteranceSummary,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Bounded end-to-end deadline over transcription, generation, and
    /// persistence for one turn.
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: f64,

    /// How many persisted messages feed the generator as context.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Rough speech-rate estimate used for `estimated_duration`.
    #[serde(default = "default_secs_per_char")]
    pub estimated_secs_per_char: f64,
}

fn default_pipeline_timeout_secs() -> f64 {
    30.0
}

fn default_context_messages() -> usize {
    5
}

fn default_secs_per_char() -> f64 {
    0.08
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
            context_messages: default_context_messages(),
            estimated_secs_per_char: default_secs_per_char(),
        }
    }
}

/// What happened to an appended audio frame.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Still accumulating; the gateway reports buffering progress.
    Buffering { buffer_size: usize, duration: f64 },
    /// A flush trigger fired; the turn pipeline is now running on its own
    /// task and reports through the room channel.
    TurnStarted,
}

/// Result of the synchronous half of a turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_message: UtteranceSummary,
    pub ai_message: UtteranceSummary,
    pub stream_id: Uuid,
}

struct StagedTurn {
    room: Room,
    user: Utterance,
    ai: Utterance,
}

/// The per-room turn state machine and its collaborator wiring.
///
/// Cheap to clone; all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct DebateEngine {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) transcriber: Arc<dyn Transcriber>,
    pub(crate) generator: Arc<dyn RebuttalGenerator>,
    pub(crate) synthesizer: Arc<dyn SpeechSynthesizer>,
    pub(crate) ingest: AudioIngest,
    pub(crate) streams: StreamRegistry,
    pub(crate) config: EngineConfig,
}

impl DebateEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        persistence: Arc<dyn Persistence>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn RebuttalGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        ingest: AudioIngest,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            persistence,
            transcriber,
            generator,
            synthesizer,
            ingest,
            streams: StreamRegistry::new(),
            config,
        }
    }

    pub fn ingest(&self) -> &AudioIngest {
        &self.ingest
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Appends one audio frame and, when a flush trigger fires with no turn
    /// already in flight, starts the turn pipeline for the buffered
    /// utterance on its own task. The caller never waits on upstream calls,
    /// so the connection's receive loop stays responsive while the AI is
    /// thinking.
    pub async fn ingest_frame(
        &self,
        room_id: Uuid,
        frame: Vec<u8>,
    ) -> Result<IngestOutcome, EngineError> {
        let status = self.ingest.append(room_id, frame).await;

        if status.flush_due.is_some() && !self.ingest.is_processing(room_id).await {
            self.spawn_turn(room_id).await?;
            return Ok(IngestOutcome::TurnStarted);
        }

        Ok(IngestOutcome::Buffering {
            buffer_size: status.frame_count,
            duration: status.duration_secs,
        })
    }

    /// Flushes the buffer now and runs the rest of the turn in the
    /// background. The flush happens before the task is spawned, so the
    /// processing flag is already raised when this returns and a racing
    /// second trigger cannot start a duplicate turn.
    ///
    /// Failures past this point have no caller to return to; recoverable
    /// ones are reported to clients through the room channel.
    pub async fn spawn_turn(&self, room_id: Uuid) -> Result<(), EngineError> {
        let flushed = self.ingest.begin_flush(room_id).await?;
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute_turn(flushed).await {
                if e.is_recoverable() {
                    let _ = engine
                        .store
                        .publish(
                            room_id,
                            ServerEvent::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                }
            }
        });
        Ok(())
    }

    /// Runs one full turn for whatever is buffered and waits for its
    /// synchronous half: flush, transcribe, generate, persist, and hand off
    /// to the streaming fan-out.
    pub async fn run_turn(&self, room_id: Uuid) -> Result<TurnOutcome, EngineError> {
        let flushed = self.ingest.begin_flush(room_id).await?;
        self.execute_turn(flushed).await
    }

    /// The turn body shared by [`run_turn`](Self::run_turn) and
    /// [`spawn_turn`](Self::spawn_turn); expects the buffer already flushed.
    async fn execute_turn(&self, flushed: FlushedUtterance) -> Result<TurnOutcome, EngineError> {
        let room_id = flushed.room_id;
        tracing::info!(
            room_id = %room_id,
            frames = flushed.frame_count,
            duration_secs = flushed.duration_secs,
            "turn pipeline started"
        );

        // Absence of the session record mid-debate is terminal for this
        // room's pipeline; check before spending time on upstream calls.
        let session_check = self.store.get(room_id).await;
        if let Err(e) = session_check {
            self.ingest.finish_flush(room_id).await;
            return Err(e.into());
        }

        let deadline = Duration::from_secs_f64(self.config.pipeline_timeout_secs);
        let staged = tokio::time::timeout(
            deadline,
            self.prepare_turn(room_id, &flushed.audio, flushed.duration_secs),
        )
        .await;

        let result = match staged {
            Ok(Ok(staged)) => self.handoff(room_id, flushed.duration_secs, staged).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Timeout(self.config.pipeline_timeout_secs)),
        };

        // The processing flag drops whether the turn succeeded or failed;
        // failure must not wedge the room.
        self.ingest.finish_flush(room_id).await;

        if let Err(ref e) = result {
            tracing::warn!(room_id = %room_id, phase = %TurnPhase::Failed, "turn aborted: {}", e);
        }
        result
    }

    /// Steps 1–4: everything before the stream handoff, bounded by the
    /// pipeline deadline. No turn-number change and no streaming state is
    /// touched in here, so a failure leaves the room exactly as it was.
    async fn prepare_turn(
        &self,
        room_id: Uuid,
        audio: &[u8],
        audio_secs: f64,
    ) -> Result<StagedTurn, EngineError> {
        let room = match self.persistence.get_room(room_id).await {
            Ok(room) => room,
            Err(CollabError::NotFound(_)) => return Err(EngineError::RoomNotFound(room_id)),
            Err(e) => return Err(EngineError::Persistence(e.to_string())),
        };

        let mut phase = TurnPhase::Transcribing;
        tracing::debug!(room_id = %room_id, %phase, "transcribing utterance");
        let stt_started = std::time::Instant::now();
        let transcript = self
            .transcriber
            .transcribe(audio, &room.language)
            .await
            .map_err(|e| EngineError::Upstream {
                phase: TurnPhase::Transcribing,
                message: e.to_string(),
            })?;
        let stt_secs = stt_started.elapsed().as_secs_f64();

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(EngineError::EmptyTranscript);
        }
        phase = TurnPhase::Transcribed;
        tracing::debug!(room_id = %room_id, %phase, chars = transcript.len(), "transcript ready");

        // Context is fetched before the user utterance is persisted so the
        // fresh argument appears exactly once in the prompt.
        let context = self
            .persistence
            .recent_utterances(room_id, self.config.context_messages)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        let new_turn = room.turn_number + 1;
        let user_kind = if room.turn_number == 0 {
            UtteranceKind::Opening
        } else {
            UtteranceKind::Argument
        };
        let mut user = Utterance::new(room_id, Speaker::User, user_kind, &transcript, new_turn);
        user.audio_secs = Some(audio_secs);
        user.processing_secs = Some(stt_secs);
        self.persistence
            .save_utterance(user.clone())
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        phase = TurnPhase::Generating;
        tracing::debug!(room_id = %room_id, %phase, "generating rebuttal");
        let request = RebuttalRequest {
            topic: room.topic.clone(),
            stance: room.ai_stance,
            opponent_stance: room.user_stance,
            context,
            argument: transcript,
            language: room.language.clone(),
        };
        let gen_started = std::time::Instant::now();
        let rebuttal = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| EngineError::Upstream {
                phase: TurnPhase::Generating,
                message: e.to_string(),
            })?;
        let gen_secs = gen_started.elapsed().as_secs_f64();
        phase = TurnPhase::Generated;
        tracing::debug!(room_id = %room_id, %phase, chars = rebuttal.len(), "rebuttal ready");

        let mut ai = Utterance::new(room_id, Speaker::Ai, UtteranceKind::Rebuttal, rebuttal, new_turn)
            .streaming_placeholder();
        ai.processing_secs = Some(gen_secs);
        self.persistence
            .save_utterance(ai.clone())
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(StagedTurn { room, user, ai })
    }

    /// Step 5: advance the turn, mark the room streaming, and launch the
    /// fan-out as an independent task.
    async fn handoff(
        &self,
        room_id: Uuid,
        spoken_secs: f64,
        staged: StagedTurn,
    ) -> Result<TurnOutcome, EngineError> {
        let new_turn = self
            .persistence
            .advance_turn(room_id, TurnOwner::Ai)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        if let Err(e) = self
            .persistence
            .add_speaking_time(room_id, Speaker::User, spoken_secs)
            .await
        {
            tracing::warn!(room_id = %room_id, "failed to record speaking time: {}", e);
        }

        let stream_id = Uuid::new_v4();

        // Mutating the streaming flags is a loud failure point: better to
        // abort the turn than stream against unknown session state.
        self.store
            .update(
                room_id,
                SessionUpdate {
                    turn_number: Some(new_turn),
                    current_turn: Some(TurnOwner::Ai),
                    is_streaming: Some(true),
                    is_recording: Some(false),
                    active_stream_id: Some(Some(stream_id)),
                    ..Default::default()
                },
            )
            .await?;

        let estimated_duration =
            staged.ai.text.chars().count() as f64 * self.config.estimated_secs_per_char;

        let outcome = TurnOutcome {
            user_message: summary_of(&staged.user),
            ai_message: summary_of(&staged.ai),
            stream_id,
        };

        // All connections learn the turn completed through the room channel,
        // including ones that did not upload the audio (and the sweeper path,
        // which has no originating connection at all). Published before the
        // fan-out starts so it always precedes `ai_audio_stream_start`.
        self.store
            .publish(
                room_id,
                ServerEvent::ProcessingComplete {
                    user_message: outcome.user_message.clone(),
                    ai_message: outcome.ai_message.clone(),
                    stream_id,
                },
            )
            .await?;

        let cancel_rx = self.streams.register(stream_id, room_id).await;
        let job = StreamJob {
            room_id,
            stream_id,
            utterance_id: staged.ai.id,
            text: staged.ai.text.clone(),
            language: staged.room.language.clone(),
            voice: staged.room.ai_voice.clone(),
            estimated_duration,
        };
        tokio::spawn(fanout::run_stream(self.clone(), job, cancel_rx));

        tracing::info!(
            room_id = %room_id,
            stream_id = %stream_id,
            turn = new_turn,
            phase = %TurnPhase::Streaming,
            "turn handed off to streaming fan-out"
        );

        Ok(outcome)
    }

    /// Cancels an active stream. Returns false for unknown stream ids.
    pub async fn stop_stream(&self, stream_id: Uuid) -> bool {
        self.streams.cancel(stream_id).await
    }

    /// Transitions the room into an active debate.
    pub async fn start_debate(&self, room_id: Uuid) -> Result<(), EngineError> {
        match self
            .persistence
            .update_room_status(room_id, RoomStatus::Active)
            .await
        {
            Ok(_) => {}
            Err(CollabError::NotFound(_)) => return Err(EngineError::RoomNotFound(room_id)),
            Err(e) => return Err(EngineError::Persistence(e.to_string())),
        }

        self.store
            .update(
                room_id,
                SessionUpdate {
                    status: Some(RoomStatus::Active),
                    current_turn: Some(TurnOwner::User),
                    ..Default::default()
                },
            )
            .await?;

        self.store
            .publish(
                room_id,
                ServerEvent::DebateStarted {
                    room_id,
                    current_turn: TurnOwner::User,
                },
            )
            .await?;

        tracing::info!(room_id = %room_id, "debate started");
        Ok(())
    }

    /// Ends the debate: cancels any active stream, drops the audio buffer,
    /// retires the room, and broadcasts the outcome. The session record is
    /// left for its TTL to reap so late status queries still resolve.
    pub async fn end_debate(&self, room_id: Uuid) -> Result<DebateOutcome, EngineError> {
        let cancelled = self.streams.cancel_room(room_id).await;
        if cancelled > 0 {
            tracing::info!(room_id = %room_id, cancelled, "cancelled streams at debate end");
        }
        self.ingest.clear(room_id).await;

        let room = match self
            .persistence
            .update_room_status(room_id, RoomStatus::Completed)
            .await
        {
            Ok(room) => room,
            Err(CollabError::NotFound(_)) => return Err(EngineError::RoomNotFound(room_id)),
            Err(e) => return Err(EngineError::Persistence(e.to_string())),
        };

        let duration_secs = match (room.started_at, room.ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        let outcome = DebateOutcome {
            turns: room.turn_number,
            duration_secs,
            user_arguments: room.user_argument_count,
            ai_arguments: room.ai_argument_count,
        };

        // Best-effort: an expired session must not block retiring the room.
        if let Err(e) = self
            .store
            .update(
                room_id,
                SessionUpdate {
                    status: Some(RoomStatus::Completed),
                    is_recording: Some(false),
                    is_streaming: Some(false),
                    active_stream_id: Some(None),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(room_id = %room_id, "session update at debate end failed: {}", e);
        }

        self.store
            .publish(
                room_id,
                ServerEvent::DebateEnded {
                    room_id,
                    result: outcome.clone(),
                },
            )
            .await?;

        tracing::info!(room_id = %room_id, turns = outcome.turns, "debate ended");
        Ok(outcome)
    }
}

fn summary_of(utterance: &Utterance) -> UtteranceSummary {
    UtteranceSummary {
        id: utterance.id,
        text: utterance.text.clone(),
        timestamp: utterance.created_at,
        processing_secs: utterance.processing_secs,
    }
}
