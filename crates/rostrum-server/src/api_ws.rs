//! WebSocket gateway: per-connection protocol handler for a debate room.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Path, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rostrum_collab::CollabError;
use rostrum_engine::IngestOutcome;
use rostrum_session::EventStream;
use rostrum_types::{Room, RoomStatus, ServerEvent, SessionState, SessionUpdate, TurnOwner};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub user_id: Option<String>,
}

/// Incoming control message kinds.
///
/// Unknown `type` values land in `Unrecognized` so the gateway can answer
/// with a structured error instead of silently ignoring them.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    StartRecording,
    StopRecording,
    StartDebate,
    EndDebate,
    Ping,
    GetRoomStatus,
    StopAiStream { stream_id: Uuid },
    #[serde(other)]
    Unrecognized,
}

/// Tracks which connection currently controls each room.
///
/// Multiple connections may subscribe to one room (reconnects, multiple
/// devices); the most recently registered one is authoritative for control
/// actions, the rest receive read-only broadcasts.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    authoritative: Arc<Mutex<HashMap<Uuid, Uuid>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and makes it authoritative for the room,
    /// displacing any previous holder. Returns the connection id.
    pub async fn register(&self, room_id: Uuid) -> Uuid {
        let connection_id = Uuid::new_v4();
        let previous = self
            .authoritative
            .lock()
            .await
            .insert(room_id, connection_id);
        if previous.is_some() {
            tracing::info!(room_id = %room_id, "control authority moved to newest connection");
        }
        connection_id
    }

    pub async fn is_authoritative(&self, room_id: Uuid, connection_id: Uuid) -> bool {
        self.authoritative.lock().await.get(&room_id) == Some(&connection_id)
    }

    /// Clears the authority entry if this connection still holds it.
    pub async fn remove(&self, room_id: Uuid, connection_id: Uuid) {
        let mut map = self.authoritative.lock().await;
        if map.get(&room_id) == Some(&connection_id) {
            map.remove(&room_id);
        }
    }
}

/// WebSocket handler: `GET /ws/{roomId}?user_id=...`.
///
/// Rejection codes are distinct per failure class: `401` when no identity is
/// supplied, `403` when the identity is not the room owner, `404` when the
/// room does not exist.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let user_id = match params.user_id {
        Some(ref id) if !id.trim().is_empty() => id.clone(),
        _ => {
            tracing::warn!(room_id = %room_id, "websocket connect missing user_id");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let room = match state.persistence.get_room(room_id).await {
        Ok(room) => room,
        Err(CollabError::NotFound(_)) => {
            tracing::warn!(room_id = %room_id, user_id = %user_id, "websocket connect to unknown room");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!(room_id = %room_id, "room lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if room.user_id != user_id {
        tracing::warn!(
            room_id = %room_id,
            user_id = %user_id,
            "websocket connect by non-owner"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    tracing::info!(room_id = %room_id, user_id = %user_id, "websocket auth success");
    ws.on_upgrade(move |socket| handle_socket(socket, state, room, user_id))
}

/// Sends a JSON-serialized event over the connection's sender channel.
fn send_event(tx: &mpsc::Sender<String>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send WebSocket event to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize WebSocket event: {}", e);
        }
    }
}

fn send_error(tx: &mpsc::Sender<String>, message: impl Into<String>) {
    send_event(
        tx,
        &ServerEvent::Error {
            message: message.into(),
        },
    );
}

/// Builds the `room_status` snapshot from the session record, falling back
/// to the durable room when the session has expired (best-effort read).
async fn room_status_event(state: &AppState, room: &Room) -> ServerEvent {
    let (status, current_turn, turn_number, is_recording, is_streaming) =
        match state.store.get(room.id).await {
            Ok(session) => (
                session.status,
                session.current_turn,
                session.turn_number,
                session.is_recording,
                session.is_streaming,
            ),
            Err(_) => (room.status, room.current_turn, room.turn_number, false, false),
        };

    ServerEvent::RoomStatus {
        room_id: room.id,
        status,
        current_turn,
        turn_number,
        is_recording,
        is_streaming,
        speaker: match current_turn {
            TurnOwner::User => "user".to_string(),
            TurnOwner::Ai => "ai".to_string(),
        },
        language: room.language.clone(),
    }
}

/// Handles one WebSocket connection for its lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room: Room, user_id: String) {
    let room_id = room.id;

    // Recreate the session record if the TTL reaped it while the room was
    // idle; reconnecting to a waiting room must not dead-end.
    if state.store.get(room_id).await.is_err() {
        let mut session = SessionState::new(room_id);
        session.status = room.status;
        session.current_turn = room.current_turn;
        session.turn_number = room.turn_number;
        if let Err(e) = state.store.create(session).await {
            tracing::error!(room_id = %room_id, "failed to recreate session record: {}", e);
        }
    }

    if let Err(e) = state
        .store
        .update(
            room_id,
            SessionUpdate {
                connection_delta: 1,
                ..Default::default()
            },
        )
        .await
    {
        tracing::warn!(room_id = %room_id, "failed to count connection: {}", e);
    }

    let connection_id = state.connections.register(room_id).await;

    let (mut sender, mut receiver) = socket.split();

    // Bounded per-connection queue: a consumer that cannot keep up with the
    // audio fan-out drops events rather than growing memory without bound.
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Forward the room's pub/sub events to this connection.
    let events_task = match state.store.subscribe(room_id).await {
        Ok(events) => Some(tokio::spawn(forward_room_events(events, tx.clone()))),
        Err(e) => {
            tracing::error!(room_id = %room_id, "failed to subscribe to room channel: {}", e);
            None
        }
    };

    let heartbeat_tx = tx.clone();
    let heartbeat_interval = state.heartbeat_interval;
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            send_event(
                &heartbeat_tx,
                &ServerEvent::Heartbeat {
                    timestamp: Utc::now(),
                },
            );
        }
    });

    send_event(
        &tx,
        &ServerEvent::ConnectionEstablished {
            room_id,
            user_id: user_id.clone(),
            streaming_enabled: true,
        },
    );
    send_event(&tx, &room_status_event(&state, &room).await);

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Binary(frame) => {
                handle_audio_frame(&state, room_id, frame.to_vec(), &tx).await;
            }
            AxumMessage::Text(text) => {
                match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(control) => {
                        handle_control(&state, &room, &user_id, connection_id, control, &tx).await;
                    }
                    Err(_) => {
                        tracing::warn!(room_id = %room_id, "failed to parse control message");
                        send_error(&tx, "invalid message format");
                    }
                }
            }
            AxumMessage::Close(_) => break,
            // axum answers protocol pings itself.
            _ => {}
        }
    }

    // Cleanup
    heartbeat_task.abort();
    if let Some(task) = events_task {
        task.abort();
    }
    send_task.abort();

    let was_authoritative = state
        .connections
        .is_authoritative(room_id, connection_id)
        .await;
    state.connections.remove(room_id, connection_id).await;

    // The controlling connection going away force-stops recording; a stale
    // `is_recording` flag would leave the room buffering audio that never
    // arrives.
    let update = SessionUpdate {
        connection_delta: -1,
        is_recording: if was_authoritative { Some(false) } else { None },
        ..Default::default()
    };
    if let Err(e) = state.store.update(room_id, update).await {
        tracing::warn!(room_id = %room_id, "failed to release connection: {}", e);
    }

    tracing::info!(room_id = %room_id, user_id = %user_id, "websocket disconnected");
}

/// Relays pub/sub events to the connection's sender queue.
async fn forward_room_events(mut events: EventStream, tx: mpsc::Sender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => send_event(&tx, &event),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "connection lagged behind room events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Routes a binary audio frame into the ingestion buffer.
///
/// Frames arriving while `is_recording=false` are dropped; the client is
/// pushing audio the server never asked for (e.g., after a forced stop).
async fn handle_audio_frame(
    state: &AppState,
    room_id: Uuid,
    frame: Vec<u8>,
    tx: &mpsc::Sender<String>,
) {
    match state.store.get(room_id).await {
        Ok(session) if session.is_recording => {}
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(room_id = %room_id, "dropping audio frame, session unavailable: {}", e);
            return;
        }
    }

    match state.engine.ingest_frame(room_id, frame).await {
        Ok(IngestOutcome::Buffering {
            buffer_size,
            duration,
        }) => {
            send_event(
                tx,
                &ServerEvent::AudioBuffering {
                    buffer_size,
                    duration,
                },
            );
        }
        // The turn runs on its own task; its result reaches every
        // connection through the room channel as `processing_complete`
        // (or an `error` event), so the receive loop keeps servicing
        // control messages while the pipeline works.
        Ok(IngestOutcome::TurnStarted) => {}
        Err(e) => {
            tracing::warn!(room_id = %room_id, "audio ingest failed: {}", e);
            if e.is_recoverable() {
                send_error(tx, format!("turn failed: {}", e));
            }
        }
    }
}

/// Executes one parsed control message.
async fn handle_control(
    state: &AppState,
    room: &Room,
    user_id: &str,
    connection_id: Uuid,
    control: ControlMessage,
    tx: &mpsc::Sender<String>,
) {
    let room_id = room.id;

    // Read-only kinds are open to every connection; anything that mutates
    // room state belongs to the authoritative connection alone.
    let mutating = !matches!(
        control,
        ControlMessage::Ping | ControlMessage::GetRoomStatus | ControlMessage::Unrecognized
    );
    if mutating
        && !state
            .connections
            .is_authoritative(room_id, connection_id)
            .await
    {
        send_error(tx, "another connection controls this debate");
        return;
    }

    match control {
        ControlMessage::StartRecording => {
            let session = match state.store.get(room_id).await {
                Ok(session) => session,
                Err(e) => {
                    send_error(tx, format!("session unavailable: {}", e));
                    return;
                }
            };
            if session.status != RoomStatus::Active {
                send_error(tx, "debate is not active");
                return;
            }
            if session.is_streaming {
                send_error(tx, "cannot record while the AI is speaking");
                return;
            }

            let update = SessionUpdate {
                is_recording: Some(true),
                current_turn: Some(TurnOwner::User),
                ..Default::default()
            };
            if let Err(e) = state.store.update(room_id, update).await {
                send_error(tx, format!("failed to start recording: {}", e));
                return;
            }
            let _ = state
                .store
                .publish(
                    room_id,
                    ServerEvent::RecordingStarted {
                        user_id: user_id.to_string(),
                    },
                )
                .await;
        }
        ControlMessage::StopRecording => {
            let update = SessionUpdate {
                is_recording: Some(false),
                ..Default::default()
            };
            if let Err(e) = state.store.update(room_id, update).await {
                send_error(tx, format!("failed to stop recording: {}", e));
                return;
            }
            let _ = state.store.publish(room_id, ServerEvent::RecordingStopped).await;
        }
        ControlMessage::StartDebate => {
            if let Err(e) = state.engine.start_debate(room_id).await {
                tracing::warn!(room_id = %room_id, "start_debate failed: {}", e);
                send_error(tx, format!("failed to start debate: {}", e));
            }
        }
        ControlMessage::EndDebate => {
            if let Err(e) = state.engine.end_debate(room_id).await {
                tracing::warn!(room_id = %room_id, "end_debate failed: {}", e);
                send_error(tx, format!("failed to end debate: {}", e));
            }
        }
        ControlMessage::Ping => {
            send_event(
                tx,
                &ServerEvent::Pong {
                    timestamp: Utc::now(),
                },
            );
        }
        ControlMessage::GetRoomStatus => {
            // Refetch the room so turn counters are current.
            let snapshot = match state.persistence.get_room(room_id).await {
                Ok(fresh) => room_status_event(state, &fresh).await,
                Err(_) => room_status_event(state, room).await,
            };
            send_event(tx, &snapshot);
        }
        ControlMessage::StopAiStream { stream_id } => {
            if !state.engine.stop_stream(stream_id).await {
                send_error(tx, format!("no active stream {}", stream_id));
            }
        }
        ControlMessage::Unrecognized => {
            send_error(tx, "unrecognized message type");
        }
    }
}
