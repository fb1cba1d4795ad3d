//! Client-side turn detection.
//!
//! Decides from a live level signal when the user has finished speaking.
//!
//! # Gates
//!
//! A turn is finalized when voice was heard, trailing silence exceeds
//! `silence_ms`, the recording is longer than `min_turn_ms` and accumulated
//! speech exceeds `min_speech_ms`. Without any level signal the turn ends on
//! duration alone (`min_turn_ms + silence_ms`). Without any voice the turn is
//! abandoned after `max_listen_ms`.

mod capture;
mod config;
mod detector;

pub use capture::{
    AudioCapture, CaptureError, CaptureLoop, CapturedAudio, Clock, ListeningGate, ListeningGuard,
    TokioClock, TurnOutcome,
};
pub use config::{DEFAULT_MIN_PAYLOAD_BASE64_LEN, TurnDetectorConfig};
pub use detector::{FinalizeReason, TickDecision, TurnDetector, TurnDetectorState};

/// Turn detection errors
#[derive(Debug, thiserror::Error)]
pub enum TurnDetectorError {
    /// A capture is already running
    #[error("A listening phase is already active")]
    AlreadyListening,

    /// The recorder failed beyond the retry budget
    #[error("Audio capture failed: {0}")]
    Capture(String),
}
