//! Server configuration loading from file and environment variables.

use rostrum_audio::VadConfig;
use rostrum_engine::EngineConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session store settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Audio buffering and voice-activity thresholds.
    #[serde(default)]
    pub audio: VadConfig,

    /// Turn pipeline tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Upstream provider settings.
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between server heartbeat events on each WebSocket connection.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// TTL for per-room session records, refreshed on every update.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

/// Paths and credentials for the STT, generation, and TTS providers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Whisper-style transcription binary.
    #[serde(default = "default_stt_binary")]
    pub stt_binary: String,

    /// Transcription model file.
    #[serde(default = "default_stt_model")]
    pub stt_model: String,

    /// Piper-style synthesis binary.
    #[serde(default = "default_tts_binary")]
    pub tts_binary: String,

    /// Directory holding `{language}-{voice}.onnx` voice models.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,

    /// OpenAI-compatible chat-completions endpoint for rebuttal generation.
    #[serde(default = "default_generation_endpoint")]
    pub generation_endpoint: String,

    /// Bearer token for the generation endpoint. Usually supplied via the
    /// `ROSTRUM_GENERATION_API_KEY` environment variable, not the file.
    #[serde(default)]
    pub generation_api_key: String,

    /// Model name sent with generation requests.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "rostrum_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_session_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_stt_binary() -> String {
    "whisper-cli".to_string()
}

fn default_stt_model() -> String {
    "models/ggml-base.bin".to_string()
}

fn default_tts_binary() -> String {
    "piper".to_string()
}

fn default_voices_dir() -> String {
    "voices".to_string()
}

fn default_generation_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            stt_binary: default_stt_binary(),
            stt_model: default_stt_model(),
            tts_binary: default_tts_binary(),
            voices_dir: default_voices_dir(),
            generation_endpoint: default_generation_endpoint(),
            generation_api_key: String::new(),
            generation_model: default_generation_model(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ROSTRUM_HOST` overrides `server.host`
/// - `ROSTRUM_PORT` overrides `server.port`
/// - `ROSTRUM_SESSION_TTL_SECS` overrides `session.ttl_secs`
/// - `ROSTRUM_GENERATION_API_KEY` overrides `providers.generation_api_key`
/// - `ROSTRUM_LOG_LEVEL` overrides `logging.level`
/// - `ROSTRUM_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("ROSTRUM_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("ROSTRUM_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(ttl) = std::env::var("ROSTRUM_SESSION_TTL_SECS") {
        if let Ok(parsed) = ttl.parse() {
            config.session.ttl_secs = parsed;
        }
    }
    if let Ok(key) = std::env::var("ROSTRUM_GENERATION_API_KEY") {
        config.providers.generation_api_key = key;
    }
    if let Ok(level) = std::env::var("ROSTRUM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("ROSTRUM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
