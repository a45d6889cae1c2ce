//! HTTP API for room creation and history.

use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use rostrum_collab::CollabError;
use rostrum_types::{Room, SessionState, Stance, Utterance};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// Request body for `POST /api/rooms`.
#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub user_id: String,
    pub topic: String,
    /// The stance the user will argue; the AI takes the opposite.
    pub stance: Stance,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_voice")]
    pub voice: String,
}

fn default_language() -> String {
    "en-IN".to_string()
}

fn default_voice() -> String {
    "anushka".to_string()
}

/// `POST /api/rooms` — creates a debate room in `waiting` status along with
/// its ephemeral session record.
pub async fn create_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), StatusCode> {
    if request.user_id.trim().is_empty() || request.topic.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let room = Room::new(
        &request.user_id,
        &request.topic,
        request.stance,
        &request.language,
        &request.voice,
    );
    let room_id = room.id;

    state
        .persistence
        .create_room(room.clone())
        .await
        .map_err(|e| {
            tracing::error!(room_id = %room_id, "failed to create room: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if let Err(e) = state.store.create(SessionState::new(room_id)).await {
        tracing::error!(room_id = %room_id, "failed to create session record: {}", e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    tracing::info!(room_id = %room_id, user_id = %request.user_id, "room created");
    Ok((StatusCode::CREATED, Json(room)))
}

/// `GET /api/rooms/{roomId}` — fetches the durable room record.
pub async fn get_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Room>, StatusCode> {
    match state.persistence.get_room(room_id).await {
        Ok(room) => Ok(Json(room)),
        Err(CollabError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(room_id = %room_id, "failed to fetch room: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Query parameters for the message history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// `GET /api/rooms/{roomId}/messages` — recent utterances, oldest first.
pub async fn get_room_messages_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Utterance>>, StatusCode> {
    // 404 for unknown rooms rather than an empty list.
    match state.persistence.get_room(room_id).await {
        Ok(_) => {}
        Err(CollabError::NotFound(_)) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(room_id = %room_id, "failed to fetch room: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    state
        .persistence
        .recent_utterances(room_id, params.limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(room_id = %room_id, "failed to fetch messages: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
