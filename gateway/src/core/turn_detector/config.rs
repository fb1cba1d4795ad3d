//! Turn detector configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum captured payload length (base64 characters) worth sending.
/// Anything shorter is container overhead with no speech in it.
pub const DEFAULT_MIN_PAYLOAD_BASE64_LEN: usize = 200;

/// Thresholds that decide when a user has finished speaking.
///
/// Observed deployments disagree on these values (silence from 900ms to
/// 2000ms, voice threshold from -50 dBFS to -45 dBFS), so every field is
/// configurable. The defaults match the most responsive tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectorConfig {
    /// Level (dBFS) above which a tick counts as voice.
    /// Closer to 0 is louder.
    pub voice_threshold_db: f32,

    /// Trailing silence after the last voice tick before a turn ends (ms)
    pub silence_ms: u64,

    /// Minimum recording duration before a turn may end (ms)
    pub min_turn_ms: u64,

    /// Minimum accumulated speech before a turn may end (ms)
    /// Filters out breaths and short filler sounds.
    pub min_speech_ms: u64,

    /// Give up on a turn if no voice was heard within this window (ms)
    pub max_listen_ms: u64,

    /// Sampling interval for level ticks (ms)
    pub tick_interval_ms: u64,

    /// Captured payloads shorter than this (base64 chars) are dropped
    pub min_payload_base64_len: usize,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            voice_threshold_db: -50.0,
            silence_ms: 900,
            min_turn_ms: 600,
            min_speech_ms: 300,
            max_listen_ms: 8000,
            tick_interval_ms: 120,
            min_payload_base64_len: DEFAULT_MIN_PAYLOAD_BASE64_LEN,
        }
    }
}

impl TurnDetectorConfig {
    /// Quick hand-off for conversational back-and-forth.
    pub fn responsive() -> Self {
        Self::default()
    }

    /// Tolerates long pauses and noisier rooms.
    pub fn patient() -> Self {
        Self {
            voice_threshold_db: -45.0,
            silence_ms: 2000,
            min_turn_ms: 800,
            min_speech_ms: 400,
            max_listen_ms: 12000,
            ..Self::default()
        }
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn min_turn(&self) -> Duration {
        Duration::from_millis(self.min_turn_ms)
    }

    pub fn min_speech(&self) -> Duration {
        Duration::from_millis(self.min_speech_ms)
    }

    pub fn max_listen(&self) -> Duration {
        Duration::from_millis(self.max_listen_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check the thresholds are internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if !self.voice_threshold_db.is_finite() || self.voice_threshold_db > 0.0 {
            return Err(format!(
                "voice_threshold_db must be a finite dBFS value <= 0, got {}",
                self.voice_threshold_db
            ));
        }
        if self.silence_ms == 0 {
            return Err("silence_ms must be greater than 0".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }
        if self.tick_interval_ms >= self.silence_ms {
            return Err(format!(
                "tick_interval_ms ({}) must be shorter than silence_ms ({})",
                self.tick_interval_ms, self.silence_ms
            ));
        }
        if self.max_listen_ms <= self.min_turn_ms {
            return Err(format!(
                "max_listen_ms ({}) must exceed min_turn_ms ({})",
                self.max_listen_ms, self.min_turn_ms
            ));
        }
        Ok(())
    }
}
