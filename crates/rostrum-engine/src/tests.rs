use crate::error::TurnPhase;
use crate::pipeline::{DebateEngine, EngineConfig, IngestOutcome};
use crate::EngineError;
use async_trait::async_trait;
use rostrum_audio::AudioIngest;
use rostrum_audio::VadConfig;
use rostrum_collab::{
    CollabError, MemoryPersistence, Persistence, RebuttalGenerator, RebuttalRequest,
    SpeechSynthesizer, SynthesisStream, Transcriber,
};
use rostrum_session::{MemorySessionStore, SessionError, SessionStore};
use rostrum_types::{
    Room, RoomStatus, ServerEvent, SessionState, Speaker, Stance, TurnOwner, UtteranceKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

struct MockTranscriber {
    result: Result<String, String>,
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String, CollabError> {
        self.result.clone().map_err(CollabError::Stt)
    }
}

/// Holds the transcript back until the test opens the gate.
struct GatedTranscriber {
    gate: Arc<Notify>,
    text: String,
}

#[async_trait]
impl Transcriber for GatedTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String, CollabError> {
        self.gate.notified().await;
        Ok(self.text.clone())
    }
}

/// Never answers within any realistic deadline.
struct StalledTranscriber;

#[async_trait]
impl Transcriber for StalledTranscriber {
    async fn transcribe(&self, _audio: &[u8], _language: &str) -> Result<String, CollabError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".to_string())
    }
}

struct MockGenerator {
    rebuttal: String,
}

#[async_trait]
impl RebuttalGenerator for MockGenerator {
    async fn generate(&self, _request: &RebuttalRequest) -> Result<String, CollabError> {
        Ok(self.rebuttal.clone())
    }
}

/// How a mock synthesis stream should play out.
#[derive(Clone)]
enum SynthScript {
    /// Emit these chunks, then end naturally.
    Chunks(Vec<Vec<u8>>),
    /// Emit `ok` chunks, then a terminal error.
    ChunksThenError { ok: usize },
    /// Emit `ok` chunks, then stall with the stream held open.
    ChunksThenHang { ok: usize },
}

struct MockSynthesizer {
    script: SynthScript,
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize_stream(
        &self,
        _text: &str,
        _language: &str,
        _voice: &str,
    ) -> Result<SynthesisStream, CollabError> {
        let (tx, rx) = mpsc::channel(32);
        let script = self.script.clone();
        tokio::spawn(async move {
            match script {
                SynthScript::Chunks(chunks) => {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
                SynthScript::ChunksThenError { ok } => {
                    for i in 0..ok {
                        if tx.send(Ok(vec![i as u8; 64])).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Err(CollabError::Synthesis("pipe burst".to_string())))
                        .await;
                }
                SynthScript::ChunksThenHang { ok } => {
                    for i in 0..ok {
                        if tx.send(Ok(vec![i as u8; 64])).await.is_err() {
                            return;
                        }
                    }
                    // Hold the sender so the stream stays open until the
                    // consumer drops it.
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    drop(tx);
                }
            }
        });
        Ok(SynthesisStream::new(rx))
    }
}

struct Fixture {
    engine: DebateEngine,
    store: Arc<MemorySessionStore>,
    persistence: Arc<MemoryPersistence>,
    room_id: Uuid,
}

async fn fixture_with(
    store: Arc<MemorySessionStore>,
    transcriber: Arc<dyn Transcriber>,
    script: SynthScript,
) -> Fixture {
    let persistence = Arc::new(MemoryPersistence::new());

    let room = Room::new("u1", "Homework should be abolished", Stance::For, "en-IN", "anushka");
    let room_id = room.id;
    persistence.create_room(room).await.expect("create room");
    persistence
        .update_room_status(room_id, RoomStatus::Active)
        .await
        .expect("activate room");

    let mut session = SessionState::new(room_id);
    session.status = RoomStatus::Active;
    store.create(session).await.expect("create session");

    let engine = DebateEngine::new(
        store.clone(),
        persistence.clone(),
        transcriber,
        Arc::new(MockGenerator {
            rebuttal: "I disagree, and here is why.".to_string(),
        }),
        Arc::new(MockSynthesizer { script }),
        AudioIngest::new(VadConfig::default()),
        EngineConfig::default(),
    );

    Fixture {
        engine,
        store,
        persistence,
        room_id,
    }
}

async fn fixture(transcript: Result<&str, &str>, script: SynthScript) -> Fixture {
    fixture_with(
        Arc::new(MemorySessionStore::new()),
        Arc::new(MockTranscriber {
            result: transcript.map(str::to_string).map_err(str::to_string),
        }),
        script,
    )
    .await
}

/// 1600 samples of amplitude 3000: loud, 0.1s worth of 16 kHz PCM.
fn loud_frame() -> Vec<u8> {
    3000i16
        .to_le_bytes()
        .iter()
        .copied()
        .cycle()
        .take(1600 * 2)
        .collect()
}

async fn buffer_speech(fx: &Fixture, frames: usize) {
    for _ in 0..frames {
        fx.engine.ingest.append(fx.room_id, loud_frame()).await;
    }
}

/// Drains room events until `stop` returns true or the deadline passes.
async fn collect_events<F>(
    rx: &mut rostrum_session::EventStream,
    stop: F,
) -> Vec<ServerEvent>
where
    F: Fn(&ServerEvent) -> bool,
{
    let mut events = Vec::new();
    let deadline = Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout(deadline, rx.recv())
            .await
            .expect("room channel timed out")
            .expect("room channel closed");
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

async fn wait_until_idle(fx: &Fixture) -> SessionState {
    for _ in 0..100 {
        let state = fx.store.get(fx.room_id).await.expect("session");
        if !state.is_streaming {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room never left streaming state");
}

#[tokio::test]
async fn full_turn_streams_ordered_chunks_with_terminal_marker() {
    let chunks = vec![vec![1u8; 64], vec![2u8; 64], vec![3u8; 64]];
    let fx = fixture(Ok("school uniforms limit expression"), SynthScript::Chunks(chunks)).await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    buffer_speech(&fx, 5).await;
    let outcome = fx.engine.run_turn(fx.room_id).await.expect("turn");

    let events = collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::AiAudioChunk { is_final: true, .. })
    })
    .await;

    // processing_complete first, then stream start, then the chunk run.
    assert!(matches!(&events[0], ServerEvent::ProcessingComplete { stream_id, .. }
        if *stream_id == outcome.stream_id));
    assert!(matches!(&events[1], ServerEvent::AiAudioStreamStart { .. }));

    let mut expected_id = 1u32;
    for event in &events[2..events.len() - 1] {
        match event {
            ServerEvent::AiAudioChunk {
                chunk_id,
                audio_data,
                is_final,
                ..
            } => {
                assert_eq!(*chunk_id, expected_id, "chunk ids must be contiguous");
                assert!(!is_final);
                assert!(audio_data.is_some());
                expected_id += 1;
            }
            other => panic!("unexpected event mid-stream: {:?}", other),
        }
    }

    match events.last() {
        Some(ServerEvent::AiAudioChunk {
            chunk_id,
            audio_data,
            is_final,
            total_chunks,
            ..
        }) => {
            assert!(*is_final);
            assert_eq!(*chunk_id, 4);
            assert_eq!(*total_chunks, Some(3));
            assert!(audio_data.is_none());
        }
        other => panic!("expected terminal chunk, got {:?}", other),
    }

    let state = wait_until_idle(&fx).await;
    assert_eq!(state.current_turn, TurnOwner::User);
    assert_eq!(state.turn_number, 1);
    assert_eq!(state.active_stream_id, None);

    let utterances = fx.persistence.utterances_for(fx.room_id).await;
    assert_eq!(utterances.len(), 2);
    assert_eq!(utterances[0].speaker, Speaker::User);
    assert_eq!(utterances[0].kind, UtteranceKind::Opening);
    assert_eq!(utterances[0].turn_number, 1);
    assert_eq!(utterances[1].speaker, Speaker::Ai);
    assert_eq!(utterances[1].turn_number, 1);
    assert!(utterances[1].streaming_completed);
    assert_eq!(utterances[1].stream_chunk_count, 3);
    assert_eq!(fx.persistence.chunk_record_count().await, 3);
}

#[tokio::test]
async fn transcription_failure_aborts_without_side_effects() {
    let fx = fixture(Err("model crashed"), SynthScript::Chunks(vec![])).await;
    buffer_speech(&fx, 3).await;

    let err = fx.engine.run_turn(fx.room_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Upstream {
            phase: TurnPhase::Transcribing,
            ..
        }
    ));

    // Nothing persisted, turn unchanged, room not wedged.
    assert!(fx.persistence.utterances_for(fx.room_id).await.is_empty());
    let room = fx.persistence.get_room(fx.room_id).await.unwrap();
    assert_eq!(room.turn_number, 0);
    let state = fx.store.get(fx.room_id).await.unwrap();
    assert_eq!(state.current_turn, TurnOwner::User);
    assert!(!state.is_streaming);
    assert!(!fx.engine.ingest.is_processing(fx.room_id).await);
}

#[tokio::test]
async fn blank_transcript_drops_the_turn() {
    let fx = fixture(Ok("   \n  "), SynthScript::Chunks(vec![])).await;
    buffer_speech(&fx, 3).await;

    let err = fx.engine.run_turn(fx.room_id).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyTranscript));
    assert!(fx.persistence.utterances_for(fx.room_id).await.is_empty());
    assert!(!fx.engine.ingest.is_processing(fx.room_id).await);
}

#[tokio::test]
async fn synthesis_failure_emits_error_and_no_terminal_chunk() {
    let fx = fixture(Ok("cars should be banned downtown"), SynthScript::ChunksThenError { ok: 12 })
        .await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    buffer_speech(&fx, 3).await;
    fx.engine.run_turn(fx.room_id).await.expect("turn");

    let events = collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::AiAudioStreamError { .. })
    })
    .await;

    let chunk_count = events
        .iter()
        .filter(|e| matches!(e, ServerEvent::AiAudioChunk { .. }))
        .count();
    assert_eq!(chunk_count, 12, "exactly the delivered chunks, no terminal");
    assert!(!events
        .iter()
        .any(|e| matches!(e, ServerEvent::AiAudioChunk { is_final: true, .. })));

    let state = wait_until_idle(&fx).await;
    assert_eq!(state.current_turn, TurnOwner::User);
    assert_eq!(state.active_stream_id, None);

    // The AI record keeps its placeholder shape: never finalized.
    let utterances = fx.persistence.utterances_for(fx.room_id).await;
    assert!(!utterances[1].streaming_completed);
    assert_eq!(utterances[1].stream_chunk_count, 0);
}

#[tokio::test]
async fn cancelling_a_stream_stops_delivery_silently() {
    let fx = fixture(Ok("nuclear power is the bridge"), SynthScript::ChunksThenHang { ok: 5 })
        .await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    buffer_speech(&fx, 3).await;
    let outcome = fx.engine.run_turn(fx.room_id).await.expect("turn");

    // Let the five available chunks drain, then cancel.
    collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::AiAudioChunk { chunk_id: 5, .. })
    })
    .await;
    assert!(fx.engine.stop_stream(outcome.stream_id).await);

    let state = wait_until_idle(&fx).await;
    assert_eq!(state.current_turn, TurnOwner::User);
    assert!(!state.is_streaming);

    // No terminal chunk and no stream error follow a cancellation.
    let leftover = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(leftover.is_err(), "cancelled stream must go quiet: {:?}", leftover);

    // The handle is gone, so a second stop is a no-op.
    assert!(!fx.engine.stop_stream(outcome.stream_id).await);
}

#[tokio::test]
async fn turn_numbers_advance_once_per_exchange() {
    let fx = fixture(Ok("first point"), SynthScript::Chunks(vec![vec![9u8; 8]])).await;

    buffer_speech(&fx, 3).await;
    fx.engine.run_turn(fx.room_id).await.expect("turn one");
    wait_until_idle(&fx).await;

    buffer_speech(&fx, 3).await;
    fx.engine.run_turn(fx.room_id).await.expect("turn two");
    wait_until_idle(&fx).await;

    let room = fx.persistence.get_room(fx.room_id).await.unwrap();
    assert_eq!(room.turn_number, 2);

    let utterances = fx.persistence.utterances_for(fx.room_id).await;
    let turns: Vec<u32> = utterances.iter().map(|u| u.turn_number).collect();
    assert_eq!(turns, vec![1, 1, 2, 2]);
    // Only the very first user utterance is the opening statement.
    assert_eq!(utterances[0].kind, UtteranceKind::Opening);
    assert_eq!(utterances[2].kind, UtteranceKind::Argument);
}

#[tokio::test]
async fn ingest_reports_buffering_below_thresholds() {
    let fx = fixture(Ok("unused"), SynthScript::Chunks(vec![])).await;

    let outcome = fx
        .engine
        .ingest_frame(fx.room_id, loud_frame())
        .await
        .expect("ingest");
    match outcome {
        IngestOutcome::Buffering {
            buffer_size,
            duration,
        } => {
            assert_eq!(buffer_size, 1);
            assert!((duration - 0.1).abs() < 1e-9);
        }
        IngestOutcome::TurnStarted => panic!("one loud frame must not flush"),
    }
}

#[tokio::test]
async fn ingest_runs_the_turn_when_silence_arrives() {
    let fx = fixture(Ok("closing thought"), SynthScript::Chunks(vec![vec![7u8; 16]])).await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    // Enough speech to clear the short-utterance window, then silence.
    buffer_speech(&fx, 15).await;
    let silent: Vec<u8> = vec![0u8; 400];
    let outcome = fx
        .engine
        .ingest_frame(fx.room_id, silent)
        .await
        .expect("ingest");
    assert!(matches!(outcome, IngestOutcome::TurnStarted));

    let events = collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::ProcessingComplete { .. })
    })
    .await;
    match events.last() {
        Some(ServerEvent::ProcessingComplete { user_message, .. }) => {
            assert_eq!(user_message.text, "closing thought");
        }
        other => panic!("expected processing_complete, got {:?}", other),
    }
    wait_until_idle(&fx).await;
}

#[tokio::test]
async fn ingest_hands_the_turn_to_a_background_task() {
    let gate = Arc::new(Notify::new());
    let fx = fixture_with(
        Arc::new(MemorySessionStore::new()),
        Arc::new(GatedTranscriber {
            gate: gate.clone(),
            text: "held point".to_string(),
        }),
        SynthScript::Chunks(vec![vec![7u8; 16]]),
    )
    .await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    buffer_speech(&fx, 15).await;
    let outcome = fx
        .engine
        .ingest_frame(fx.room_id, vec![0u8; 400])
        .await
        .expect("ingest");
    assert!(matches!(outcome, IngestOutcome::TurnStarted));

    // The call returned while transcription is still blocked, so the caller
    // is free to handle other traffic mid-turn.
    assert!(fx.engine.ingest.is_processing(fx.room_id).await);
    assert!(fx.persistence.utterances_for(fx.room_id).await.is_empty());

    gate.notify_one();
    collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::ProcessingComplete { .. })
    })
    .await;
    wait_until_idle(&fx).await;
    assert_eq!(fx.persistence.utterances_for(fx.room_id).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn pipeline_deadline_bounds_a_stalled_transcriber() {
    let fx = fixture_with(
        Arc::new(MemorySessionStore::new()),
        Arc::new(StalledTranscriber),
        SynthScript::Chunks(vec![]),
    )
    .await;
    buffer_speech(&fx, 3).await;

    let err = fx.engine.run_turn(fx.room_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    // Nothing persisted, turn unchanged, room not wedged.
    assert!(fx.persistence.utterances_for(fx.room_id).await.is_empty());
    assert!(!fx.engine.ingest.is_processing(fx.room_id).await);
    let state = fx.store.get(fx.room_id).await.unwrap();
    assert_eq!(state.current_turn, TurnOwner::User);
    assert!(!state.is_streaming);
}

#[tokio::test(start_paused = true)]
async fn expired_session_record_aborts_the_turn() {
    let store = Arc::new(MemorySessionStore::with_ttl(Duration::from_secs(60)));
    let fx = fixture_with(
        store,
        Arc::new(MockTranscriber {
            result: Ok("never transcribed".to_string()),
        }),
        SynthScript::Chunks(vec![]),
    )
    .await;
    buffer_speech(&fx, 3).await;

    tokio::time::advance(Duration::from_secs(61)).await;

    let err = fx.engine.run_turn(fx.room_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Session(SessionError::Expired(_))
    ));
    assert!(fx.persistence.utterances_for(fx.room_id).await.is_empty());
    assert!(!fx.engine.ingest.is_processing(fx.room_id).await);
}

#[tokio::test]
async fn end_debate_cancels_streams_and_reports_the_tally() {
    let fx = fixture(Ok("opening salvo"), SynthScript::ChunksThenHang { ok: 2 }).await;
    let mut rx = fx.store.subscribe(fx.room_id).await.expect("subscribe");

    buffer_speech(&fx, 3).await;
    fx.engine.run_turn(fx.room_id).await.expect("turn");
    collect_events(&mut rx, |e| {
        matches!(e, ServerEvent::AiAudioChunk { chunk_id: 2, .. })
    })
    .await;

    let outcome = fx.engine.end_debate(fx.room_id).await.expect("end");
    assert_eq!(outcome.turns, 1);
    assert_eq!(outcome.user_arguments, 1);
    assert_eq!(outcome.ai_arguments, 1);

    let events = collect_events(&mut rx, |e| matches!(e, ServerEvent::DebateEnded { .. })).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::DebateEnded { .. })));

    let room = fx.persistence.get_room(fx.room_id).await.unwrap();
    assert_eq!(room.status, RoomStatus::Completed);
    assert!(room.ended_at.is_some());

    let state = wait_until_idle(&fx).await;
    assert_eq!(state.status, RoomStatus::Completed);
}

#[tokio::test]
async fn start_debate_activates_room_and_broadcasts() {
    let store = Arc::new(MemorySessionStore::new());
    let persistence = Arc::new(MemoryPersistence::new());
    let room = Room::new("u1", "Topic", Stance::Against, "en-IN", "anushka");
    let room_id = room.id;
    persistence.create_room(room).await.unwrap();
    store.create(SessionState::new(room_id)).await.unwrap();

    let engine = DebateEngine::new(
        store.clone(),
        persistence.clone(),
        Arc::new(MockTranscriber {
            result: Ok("unused".to_string()),
        }),
        Arc::new(MockGenerator {
            rebuttal: "unused".to_string(),
        }),
        Arc::new(MockSynthesizer {
            script: SynthScript::Chunks(vec![]),
        }),
        AudioIngest::new(VadConfig::default()),
        EngineConfig::default(),
    );

    let mut rx = store.subscribe(room_id).await.unwrap();
    engine.start_debate(room_id).await.expect("start");

    let room = persistence.get_room(room_id).await.unwrap();
    assert_eq!(room.status, RoomStatus::Active);
    assert!(room.started_at.is_some());

    let state = store.get(room_id).await.unwrap();
    assert_eq!(state.status, RoomStatus::Active);
    assert_eq!(state.current_turn, TurnOwner::User);

    let events = collect_events(&mut rx, |e| matches!(e, ServerEvent::DebateStarted { .. })).await;
    assert!(matches!(
        events.last(),
        Some(ServerEvent::DebateStarted { current_turn: TurnOwner::User, .. })
    ));
}

#[tokio::test]
async fn missing_room_record_is_a_turn_error() {
    let fx = fixture(Ok("anything"), SynthScript::Chunks(vec![])).await;

    // Session exists but the durable room record does not.
    let orphan = Uuid::new_v4();
    fx.store.create(SessionState::new(orphan)).await.unwrap();
    fx.engine.ingest.append(orphan, loud_frame()).await;

    let err = fx.engine.run_turn(orphan).await.unwrap_err();
    assert!(matches!(err, EngineError::RoomNotFound(id) if id == orphan));
}
