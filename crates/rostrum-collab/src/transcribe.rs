//! Speech-to-text collaborator.

use crate::error::CollabError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized
/// payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for STT process execution.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Converts a complete utterance of raw audio into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, CollabError>;
}

/// Transcriber backed by a whisper.cpp-style binary.
///
/// The binary receives audio on stdin (`-f -`), the model path via `-m`,
/// and the room language via `-l`; the transcript is read from stdout.
#[derive(Debug, Clone)]
pub struct ProcessTranscriber {
    model_path: PathBuf,
    binary_path: PathBuf,
}

impl ProcessTranscriber {
    pub fn new(model_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Transcriber for ProcessTranscriber {
    async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, CollabError> {
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(CollabError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.binary_path);
        command
            .arg("-m")
            .arg(&self.model_path)
            .arg("-l")
            .arg(language)
            .arg("-f")
            .arg("-") // read from stdin
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| CollabError::Stt(format!("failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CollabError::Stt("failed to open stdin".to_string()))?;

        stdin
            .write_all(audio)
            .await
            .map_err(|e| CollabError::Stt(format!("failed to write to stdin: {}", e)))?;
        drop(stdin); // Close stdin to signal EOF

        let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                CollabError::Stt(format!(
                    "STT process timed out after {} seconds",
                    STT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| CollabError::Stt(format!("failed to read stdout: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollabError::Stt(format!("STT binary failed: {}", stderr)));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(text)
    }
}
