//! Rostrum server library logic.

pub mod api_rooms;
pub mod api_ws;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use rostrum_collab::Persistence;
use rostrum_engine::DebateEngine;
use rostrum_session::SessionStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The turn pipeline and its collaborator wiring.
    pub engine: DebateEngine,
    /// Ephemeral per-room session state and pub/sub.
    pub store: Arc<dyn SessionStore>,
    /// Durable room and utterance storage.
    pub persistence: Arc<dyn Persistence>,
    /// Per-room WebSocket connection authority tracking.
    pub connections: api_ws::ConnectionRegistry,
    /// Interval between server heartbeat events on each connection.
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(
        engine: DebateEngine,
        store: Arc<dyn SessionStore>,
        persistence: Arc<dyn Persistence>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            persistence,
            connections: api_ws::ConnectionRegistry::new(),
            heartbeat_interval,
        }
    }
}

/// Maximum request body size (1 MiB). Room CRUD payloads are tiny; audio
/// travels over the WebSocket, not HTTP.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/rooms",
            post(api_rooms::create_room_handler),
        )
        .route(
            "/api/rooms/{roomId}",
            get(api_rooms::get_room_handler),
        )
        .route(
            "/api/rooms/{roomId}/messages",
            get(api_rooms::get_room_messages_handler),
        )
        .route("/ws/{roomId}", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
