//! Rostrum server binary.
//!
//! Starts the axum HTTP/WebSocket server with structured logging, wires the
//! debate engine to its collaborators, and shuts down gracefully on
//! SIGTERM/SIGINT.

use rostrum_audio::AudioIngest;
use rostrum_collab::{HttpRebuttalGenerator, MemoryPersistence, ProcessSynthesizer, ProcessTranscriber};
use rostrum_engine::{spawn_timeout_sweeper, DebateEngine};
use rostrum_server::config;
use rostrum_server::{app, AppState};
use rostrum_session::MemorySessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ROSTRUM_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Wire the engine to its collaborators.
    let store = Arc::new(MemorySessionStore::with_ttl(Duration::from_secs(
        config.session.ttl_secs,
    )));
    let persistence = Arc::new(MemoryPersistence::new());
    let transcriber = Arc::new(ProcessTranscriber::new(
        &config.providers.stt_model,
        &config.providers.stt_binary,
    ));
    let generator = Arc::new(HttpRebuttalGenerator::new(
        &config.providers.generation_endpoint,
        &config.providers.generation_api_key,
        &config.providers.generation_model,
    ));
    let synthesizer = Arc::new(ProcessSynthesizer::new(
        &config.providers.tts_binary,
        &config.providers.voices_dir,
    ));

    let engine = DebateEngine::new(
        store.clone(),
        persistence.clone(),
        transcriber,
        generator,
        synthesizer,
        AudioIngest::new(config.audio.clone()),
        config.engine.clone(),
    );

    // Inactivity flushes fire from here, independent of frame arrival.
    spawn_timeout_sweeper(engine.clone());

    let state = AppState::new(
        engine,
        store,
        persistence,
        Duration::from_secs(config.server.heartbeat_secs),
    );
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting rostrum server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("rostrum server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
