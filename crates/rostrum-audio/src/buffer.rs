//! Per-room audio accumulation with flush heuristics.

use crate::error::AudioError;
use crate::vad::{is_silent, VadConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Which heuristic decided the buffer was ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Accumulated duration exceeded the threshold.
    Duration,
    /// The latest frame was classified as silence (end of utterance).
    Silence,
    /// Frame count hit the hard cap (memory bound).
    Capacity,
    /// No activity for longer than the timeout.
    Inactivity,
}

/// Snapshot returned from [`AudioIngest::append`].
#[derive(Debug, Clone, Copy)]
pub struct BufferStatus {
    pub frame_count: usize,
    pub duration_secs: f64,
    /// Set when any flush trigger fired for this append.
    pub flush_due: Option<FlushTrigger>,
}

/// The frames taken from a buffer by a successful flush.
#[derive(Debug)]
pub struct FlushedUtterance {
    pub room_id: Uuid,
    /// All buffered frames concatenated in arrival order.
    pub audio: Vec<u8>,
    pub frame_count: usize,
    pub duration_secs: f64,
}

struct RoomBuffer {
    frames: Vec<Vec<u8>>,
    duration_secs: f64,
    last_activity: Instant,
    /// Mutual-exclusion flag: true while a flush cycle is running.
    processing: bool,
}

impl RoomBuffer {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            duration_secs: 0.0,
            last_activity: Instant::now(),
            processing: false,
        }
    }
}

/// Accumulates raw audio frames per room and decides when to flush.
///
/// Buffers are created lazily on the first frame, cleared atomically on
/// flush, and never persisted. At most one flush per room is in flight at a
/// time, guarded by the per-room `processing` flag.
#[derive(Clone)]
pub struct AudioIngest {
    config: VadConfig,
    rooms: Arc<Mutex<HashMap<Uuid, RoomBuffer>>>,
}

impl AudioIngest {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Appends a frame, updating the duration estimate and activity clock,
    /// and reports whether a flush trigger fired.
    pub async fn append(&self, room_id: Uuid, frame: Vec<u8>) -> BufferStatus {
        let mut rooms = self.rooms.lock().await;
        let buffer = rooms.entry(room_id).or_insert_with(RoomBuffer::new);

        let silent = is_silent(&frame, self.config.silence_threshold);
        buffer.frames.push(frame);
        buffer.duration_secs += self.config.frame_secs;
        buffer.last_activity = Instant::now();

        let flush_due = self.trigger_for(buffer, silent);
        if let Some(trigger) = flush_due {
            tracing::debug!(
                room_id = %room_id,
                ?trigger,
                frames = buffer.frames.len(),
                duration_secs = buffer.duration_secs,
                "flush trigger fired"
            );
        }

        BufferStatus {
            frame_count: buffer.frames.len(),
            duration_secs: buffer.duration_secs,
            flush_due,
        }
    }

    fn trigger_for(&self, buffer: &RoomBuffer, latest_silent: bool) -> Option<FlushTrigger> {
        if buffer.duration_secs > self.config.flush_after_secs {
            return Some(FlushTrigger::Duration);
        }
        if latest_silent {
            return Some(FlushTrigger::Silence);
        }
        if buffer.frames.len() > self.config.max_buffer_frames {
            return Some(FlushTrigger::Capacity);
        }
        if buffer.last_activity.elapsed()
            > Duration::from_secs_f64(self.config.inactivity_timeout_secs)
        {
            return Some(FlushTrigger::Inactivity);
        }
        None
    }

    /// Atomically takes the buffered frames and raises the processing flag.
    ///
    /// The caller must invoke [`finish_flush`](Self::finish_flush) once the
    /// pipeline run completes (successfully or not). A second flush request
    /// while the flag is raised fails with [`AudioError::FlushInProgress`]
    /// and leaves the buffer contents unchanged.
    pub async fn begin_flush(&self, room_id: Uuid) -> Result<FlushedUtterance, AudioError> {
        let mut rooms = self.rooms.lock().await;
        let buffer = rooms
            .get_mut(&room_id)
            .ok_or(AudioError::EmptyBuffer(room_id))?;

        if buffer.processing {
            return Err(AudioError::FlushInProgress(room_id));
        }
        if buffer.frames.is_empty() {
            return Err(AudioError::EmptyBuffer(room_id));
        }

        buffer.processing = true;
        let frames = std::mem::take(&mut buffer.frames);
        let duration_secs = std::mem::replace(&mut buffer.duration_secs, 0.0);

        let frame_count = frames.len();
        let audio = frames.concat();

        Ok(FlushedUtterance {
            room_id,
            audio,
            frame_count,
            duration_secs,
        })
    }

    /// Lowers the processing flag after a flush cycle.
    pub async fn finish_flush(&self, room_id: Uuid) {
        let mut rooms = self.rooms.lock().await;
        if let Some(buffer) = rooms.get_mut(&room_id) {
            buffer.processing = false;
        }
    }

    /// True while a flush cycle is running for the room.
    pub async fn is_processing(&self, room_id: Uuid) -> bool {
        let rooms = self.rooms.lock().await;
        rooms.get(&room_id).map(|b| b.processing).unwrap_or(false)
    }

    /// Rooms whose non-empty, idle buffers have exceeded the inactivity
    /// timeout. Drives the periodic sweep so the timeout trigger fires even
    /// when the client stops sending frames entirely.
    pub async fn rooms_past_timeout(&self) -> Vec<Uuid> {
        let timeout = Duration::from_secs_f64(self.config.inactivity_timeout_secs);
        let rooms = self.rooms.lock().await;
        rooms
            .iter()
            .filter(|(_, buffer)| {
                !buffer.processing
                    && !buffer.frames.is_empty()
                    && buffer.last_activity.elapsed() > timeout
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drops the room's buffer entirely (debate ended or room torn down).
    pub async fn clear(&self, room_id: Uuid) {
        self.rooms.lock().await.remove(&room_id);
    }
}
