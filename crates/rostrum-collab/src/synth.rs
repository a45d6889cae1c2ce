//! Streaming speech-synthesis collaborator.

use crate::error::CollabError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Maximum text input size for synthesis (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Bytes of raw PCM delivered per chunk.
const SYNTH_CHUNK_BYTES: usize = 4096;

/// In-flight chunk backlog before the producer blocks.
const SYNTH_CHANNEL_CAPACITY: usize = 32;

/// An ordered, cancellable sequence of synthesized audio chunks.
///
/// Dropping the stream releases the synthesis connection: the producer task
/// observes the closed channel and tears the upstream down.
#[derive(Debug)]
pub struct SynthesisStream {
    rx: mpsc::Receiver<Result<Vec<u8>, CollabError>>,
}

impl SynthesisStream {
    pub fn new(rx: mpsc::Receiver<Result<Vec<u8>, CollabError>>) -> Self {
        Self { rx }
    }

    /// Next audio chunk; `None` means the stream completed naturally.
    /// An `Err` item is terminal; no further chunks follow it.
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, CollabError>> {
        self.rx.recv().await
    }
}

/// Drives a synthesis provider for one utterance.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_stream(
        &self,
        text: &str,
        language: &str,
        voice: &str,
    ) -> Result<SynthesisStream, CollabError>;
}

/// Synthesizer backed by a piper-style binary writing raw PCM to stdout.
///
/// Voice models live under `voices_dir` as `{language}-{voice}.onnx`. The
/// child is spawned with `kill_on_drop`, so abandoning the stream (client
/// cancellation, fan-out failure) reaps the process.
#[derive(Debug, Clone)]
pub struct ProcessSynthesizer {
    binary_path: PathBuf,
    voices_dir: PathBuf,
}

impl ProcessSynthesizer {
    pub fn new(binary_path: impl AsRef<Path>, voices_dir: impl AsRef<Path>) -> Self {
        Self {
            binary_path: binary_path.as_ref().to_path_buf(),
            voices_dir: voices_dir.as_ref().to_path_buf(),
        }
    }

    fn model_path(&self, language: &str, voice: &str) -> PathBuf {
        self.voices_dir.join(format!("{}-{}.onnx", language, voice))
    }
}

#[async_trait]
impl SpeechSynthesizer for ProcessSynthesizer {
    async fn synthesize_stream(
        &self,
        text: &str,
        language: &str,
        voice: &str,
    ) -> Result<SynthesisStream, CollabError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(CollabError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let model_path = self.model_path(language, voice);
        if !model_path.exists() {
            return Err(CollabError::Synthesis(format!(
                "voice model not found: {:?}",
                model_path
            )));
        }

        let mut command = Command::new(&self.binary_path);
        command
            .arg("--model")
            .arg(&model_path)
            .arg("--output_raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| CollabError::Synthesis(format!("failed to spawn synthesizer: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CollabError::Synthesis("failed to open stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollabError::Synthesis("failed to open stdout".to_string()))?;

        // Write the text from a separate task so a full stdout pipe cannot
        // deadlock the child against an unread stdin.
        let text_owned = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(text_owned.as_bytes()).await {
                tracing::warn!("failed to write synthesis text to child stdin: {}", e);
            }
        });

        let (tx, rx) = mpsc::channel(SYNTH_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut buf = vec![0u8; SYNTH_CHUNK_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break, // EOF: child finished writing audio
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                            // Consumer dropped the stream; kill_on_drop reaps
                            // the child when this task returns.
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(CollabError::Synthesis(format!(
                                "failed to read synthesized audio: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let _ = tx
                        .send(Err(CollabError::Synthesis(format!(
                            "synthesizer exited with {}",
                            status
                        ))))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(CollabError::Synthesis(format!(
                            "failed to reap synthesizer: {}",
                            e
                        ))))
                        .await;
                }
            }
        });

        Ok(SynthesisStream::new(rx))
    }
}
