//! Ordered, cancellable delivery of synthesized audio chunks.
//!
//! One fan-out task runs per AI turn. It pulls chunks off the synthesis
//! stream, base64-encodes them, and publishes them through the room's
//! pub/sub channel with contiguous ids starting at 1. However the stream
//! ends, the task restores the room to the user's turn before exiting.

use crate::pipeline::DebateEngine;
use base64::Engine as _;
use rostrum_types::{ServerEvent, SessionUpdate, Speaker, TurnOwner};
use tokio::sync::watch;
use uuid::Uuid;

/// Everything the fan-out needs from the staged turn.
pub(crate) struct StreamJob {
    pub room_id: Uuid,
    pub stream_id: Uuid,
    pub utterance_id: Uuid,
    pub text: String,
    pub language: String,
    pub voice: String,
    pub estimated_duration: f64,
}

enum StreamEnd {
    /// All chunks delivered; `0` is legal for empty synthesis output.
    Completed { total_chunks: u32 },
    /// Mid-stream failure. No terminal chunk follows an error event, so a
    /// client that saw chunks but no `is_final` knows the stream aborted.
    Failed { message: String },
    /// Cancelled via the registry. Silent on the wire.
    Cancelled,
}

pub(crate) async fn run_stream(
    engine: DebateEngine,
    job: StreamJob,
    mut cancel: watch::Receiver<bool>,
) {
    let end = deliver(&engine, &job, &mut cancel).await;

    match &end {
        StreamEnd::Completed { total_chunks } => {
            tracing::info!(
                room_id = %job.room_id,
                stream_id = %job.stream_id,
                total_chunks,
                "audio stream completed"
            );
            if let Err(e) = engine
                .persistence
                .add_speaking_time(job.room_id, Speaker::Ai, job.estimated_duration)
                .await
            {
                tracing::warn!(room_id = %job.room_id, "failed to record speaking time: {}", e);
            }
        }
        StreamEnd::Failed { message } => {
            tracing::warn!(
                room_id = %job.room_id,
                stream_id = %job.stream_id,
                "audio stream failed: {}",
                message
            );
            publish(&engine, job.room_id, ServerEvent::AiAudioStreamError {
                stream_id: job.stream_id,
                error: message.clone(),
            })
            .await;
        }
        StreamEnd::Cancelled => {
            tracing::info!(
                room_id = %job.room_id,
                stream_id = %job.stream_id,
                "audio stream cancelled"
            );
        }
    }

    engine.streams.remove(job.stream_id).await;

    // The turn always comes back to the user, even after failure or
    // cancellation; a wedged `is_streaming` flag would block every
    // subsequent `start_recording`.
    if let Err(e) = engine
        .store
        .update(
            job.room_id,
            SessionUpdate {
                is_streaming: Some(false),
                current_turn: Some(TurnOwner::User),
                active_stream_id: Some(None),
                ..Default::default()
            },
        )
        .await
    {
        tracing::warn!(room_id = %job.room_id, "failed to reset streaming state: {}", e);
    }
}

async fn deliver(
    engine: &DebateEngine,
    job: &StreamJob,
    cancel: &mut watch::Receiver<bool>,
) -> StreamEnd {
    let mut stream = match engine
        .synthesizer
        .synthesize_stream(&job.text, &job.language, &job.voice)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            return StreamEnd::Failed {
                message: e.to_string(),
            }
        }
    };

    publish(engine, job.room_id, ServerEvent::AiAudioStreamStart {
        stream_id: job.stream_id,
        text: job.text.clone(),
        estimated_duration: job.estimated_duration,
        speaker: "ai".to_string(),
    })
    .await;

    let mut seq: u32 = 0;
    loop {
        let next = tokio::select! {
            biased;
            changed = cancel.changed() => {
                // A closed sender means the registry entry was dropped;
                // treat it the same as an explicit cancel.
                if changed.is_err() || *cancel.borrow() {
                    return StreamEnd::Cancelled;
                }
                continue;
            }
            chunk = stream.next_chunk() => chunk,
        };

        match next {
            Some(Ok(audio)) => {
                seq += 1;
                let chunk_size = audio.len();
                let encoded = base64::engine::general_purpose::STANDARD.encode(&audio);
                publish(engine, job.room_id, ServerEvent::AiAudioChunk {
                    stream_id: job.stream_id,
                    chunk_id: seq,
                    audio_data: Some(encoded),
                    chunk_size,
                    is_final: false,
                    total_chunks: None,
                })
                .await;

                // Analytics only; a write failure must not interrupt audio.
                if let Err(e) = engine
                    .persistence
                    .record_chunk(job.utterance_id, seq, chunk_size)
                    .await
                {
                    tracing::debug!(stream_id = %job.stream_id, "chunk record failed: {}", e);
                }
            }
            Some(Err(e)) => {
                return StreamEnd::Failed {
                    message: e.to_string(),
                }
            }
            None => break,
        }
    }

    publish(engine, job.room_id, ServerEvent::AiAudioChunk {
        stream_id: job.stream_id,
        chunk_id: seq + 1,
        audio_data: None,
        chunk_size: 0,
        is_final: true,
        total_chunks: Some(seq),
    })
    .await;

    if let Err(e) = engine
        .persistence
        .mark_streaming_complete(job.utterance_id, seq)
        .await
    {
        tracing::warn!(stream_id = %job.stream_id, "failed to finalize utterance: {}", e);
    }

    StreamEnd::Completed { total_chunks: seq }
}

/// Publishes to the room channel, tolerating an expired session: clients of
/// a reaped room have nothing left to receive anyway.
async fn publish(engine: &DebateEngine, room_id: Uuid, event: ServerEvent) {
    if let Err(e) = engine.store.publish(room_id, event).await {
        tracing::debug!(room_id = %room_id, "publish skipped: {}", e);
    }
}
