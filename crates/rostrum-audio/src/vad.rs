//! RMS-based silence classification.

use serde::Deserialize;

/// Voice-activity and flush policy. Defaults mirror the tuning the platform
/// shipped with; all values are overridable from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VadConfig {
    /// Flush once the accumulated duration estimate exceeds this.
    #[serde(default = "default_flush_after_secs")]
    pub flush_after_secs: f64,

    /// Normalized RMS below which a frame counts as silence.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f64,

    /// Hard cap on buffered frames per room (memory bound).
    #[serde(default = "default_max_buffer_frames")]
    pub max_buffer_frames: usize,

    /// Force a flush after this much inactivity, even with no new frames.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: f64,

    /// Duration estimate attributed to each client frame.
    #[serde(default = "default_frame_secs")]
    pub frame_secs: f64,
}

fn default_flush_after_secs() -> f64 {
    3.0
}

fn default_silence_threshold() -> f64 {
    0.01
}

fn default_max_buffer_frames() -> usize {
    50
}

fn default_inactivity_timeout_secs() -> f64 {
    5.0
}

fn default_frame_secs() -> f64 {
    0.1
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            flush_after_secs: default_flush_after_secs(),
            silence_threshold: default_silence_threshold(),
            max_buffer_frames: default_max_buffer_frames(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            frame_secs: default_frame_secs(),
        }
    }
}

/// Minimum number of 16-bit samples needed for a reliable RMS reading.
/// Shorter frames are never classified as silence: insufficient data must
/// not force a false flush.
pub const MIN_ANALYZABLE_SAMPLES: usize = 100;

/// Classifies a frame of little-endian 16-bit signed PCM as silence.
///
/// Computes the RMS amplitude, normalizes by full scale (32768), and
/// compares against `threshold`. A trailing odd byte is ignored.
pub fn is_silent(frame: &[u8], threshold: f64) -> bool {
    let sample_count = frame.len() / 2;
    if sample_count < MIN_ANALYZABLE_SAMPLES {
        return false;
    }

    let mut sum_squares = 0.0f64;
    for pair in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64;
        sum_squares += sample * sample;
    }

    let rms = (sum_squares / sample_count as f64).sqrt();
    let normalized = rms / 32768.0;
    normalized < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(sample: i16, count: usize) -> Vec<u8> {
        sample
            .to_le_bytes()
            .iter()
            .copied()
            .cycle()
            .take(count * 2)
            .collect()
    }

    #[test]
    fn short_frame_is_never_silent() {
        // 99 zero samples: below the analyzable minimum, so not silent even
        // though the signal is literally zero.
        let frame = frame_of(0, MIN_ANALYZABLE_SAMPLES - 1);
        assert!(!is_silent(&frame, 0.01));
        assert!(!is_silent(&frame, 1.0));
        assert!(!is_silent(&[], 0.01));
    }

    #[test]
    fn quiet_frame_is_silent() {
        // Amplitude 100/32768 ≈ 0.003, below the 0.01 default.
        let frame = frame_of(100, 200);
        assert!(is_silent(&frame, 0.01));
    }

    #[test]
    fn loud_frame_is_not_silent() {
        // Amplitude 8000/32768 ≈ 0.24.
        let frame = frame_of(8000, 200);
        assert!(!is_silent(&frame, 0.01));
    }

    #[test]
    fn threshold_is_a_strict_bound() {
        let frame = frame_of(0, 200);
        assert!(is_silent(&frame, 0.01));
        // With a zero threshold nothing qualifies as silence.
        assert!(!is_silent(&frame, 0.0));
    }

    #[test]
    fn odd_trailing_byte_is_ignored() {
        let mut frame = frame_of(100, 200);
        frame.push(0xFF);
        assert!(is_silent(&frame, 0.01));
    }
}
