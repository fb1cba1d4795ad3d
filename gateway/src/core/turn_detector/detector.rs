//! Tick-driven end-of-utterance detection.
//!
//! The detector never reads a clock. The caller passes the elapsed recording
//! duration with each level sample, which keeps every decision deterministic.

use std::time::Duration;
use tracing::debug;

use super::config::TurnDetectorConfig;
use super::TurnDetectorError;

/// Why a turn was handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Voice was heard, followed by enough silence and enough speech.
    TrailingSilence,
    /// The platform never reported a level; elapsed time decided.
    NoLevelSignal,
    /// Enough speech was heard but the listening window ran out first.
    MaxListen,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Keep listening.
    Continue,
    /// The utterance is complete; hand off the captured audio.
    Finalize(FinalizeReason),
    /// No usable speech within the listening window; send nothing.
    Abandon,
}

/// Rolling per-turn state. Reset at the start of every listening phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnDetectorState {
    pub heard_voice: bool,
    pub speaking_now: bool,
    /// Elapsed time of the most recent voice tick
    pub last_voice_at: Option<Duration>,
    /// Elapsed time when the open speech segment began
    pub segment_started_at: Option<Duration>,
    /// Closed speech segments, summed
    pub total_speech: Duration,
    /// Whether any tick carried a usable level
    pub level_reported: bool,
    /// Last elapsed value seen
    pub elapsed: Duration,
}

/// End-of-utterance detector.
///
/// Call [`begin`](Self::begin) at the start of each listening phase, feed
/// [`tick`](Self::tick) at a fixed interval, and stop once it returns anything
/// other than [`TickDecision::Continue`].
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnDetectorConfig,
    state: TurnDetectorState,
    active: bool,
}

impl TurnDetector {
    pub fn new(config: TurnDetectorConfig) -> Self {
        Self {
            config,
            state: TurnDetectorState::default(),
            active: false,
        }
    }

    pub fn config(&self) -> &TurnDetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &TurnDetectorState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start a listening phase with fresh state.
    pub fn begin(&mut self) -> Result<(), TurnDetectorError> {
        if self.active {
            return Err(TurnDetectorError::AlreadyListening);
        }
        self.state = TurnDetectorState::default();
        self.active = true;
        Ok(())
    }

    /// Drop all state and mark the detector idle.
    pub fn reset(&mut self) {
        self.state = TurnDetectorState::default();
        self.active = false;
    }

    /// Speech accumulated so far, including an open segment.
    pub fn speech_duration(&self) -> Duration {
        let open = match (self.state.speaking_now, self.state.segment_started_at) {
            (true, Some(start)) => self.state.elapsed.saturating_sub(start),
            _ => Duration::ZERO,
        };
        self.state.total_speech + open
    }

    /// Feed one level sample.
    ///
    /// `level_db` is `None` when the platform cannot report a level.
    /// `elapsed` is the recording duration at this tick.
    pub fn tick(&mut self, level_db: Option<f32>, elapsed: Duration) -> TickDecision {
        if !self.active {
            return TickDecision::Continue;
        }
        self.state.elapsed = elapsed;

        if let Some(level) = level_db {
            self.state.level_reported = true;
            if level > self.config.voice_threshold_db {
                if !self.state.heard_voice {
                    debug!(level, elapsed_ms = elapsed.as_millis() as u64, "Voice detected");
                }
                self.state.heard_voice = true;
                self.state.last_voice_at = Some(elapsed);
                if !self.state.speaking_now {
                    self.state.speaking_now = true;
                    self.state.segment_started_at = Some(elapsed);
                }
            } else if self.state.speaking_now {
                if let Some(start) = self.state.segment_started_at.take() {
                    self.state.total_speech += elapsed.saturating_sub(start);
                }
                self.state.speaking_now = false;
            }
        }

        let decision = self.evaluate(elapsed);
        if decision != TickDecision::Continue {
            debug!(
                ?decision,
                elapsed_ms = elapsed.as_millis() as u64,
                speech_ms = self.speech_duration().as_millis() as u64,
                "Turn detector decided"
            );
            self.active = false;
        }
        decision
    }

    fn evaluate(&self, elapsed: Duration) -> TickDecision {
        let config = &self.config;

        if !self.state.level_reported {
            if elapsed > config.min_turn() + config.silence() {
                return TickDecision::Finalize(FinalizeReason::NoLevelSignal);
            }
            return TickDecision::Continue;
        }

        if !self.state.heard_voice {
            if elapsed > config.max_listen() {
                return TickDecision::Abandon;
            }
            return TickDecision::Continue;
        }

        let since_voice = self
            .state
            .last_voice_at
            .map(|at| elapsed.saturating_sub(at))
            .unwrap_or_default();

        let enough_speech = self.speech_duration() > config.min_speech();
        if since_voice > config.silence() && elapsed > config.min_turn() && enough_speech {
            return TickDecision::Finalize(FinalizeReason::TrailingSilence);
        }

        // the window is absolute, even after a blip of noise
        if elapsed > config.max_listen() {
            if enough_speech {
                return TickDecision::Finalize(FinalizeReason::MaxListen);
            }
            return TickDecision::Abandon;
        }

        TickDecision::Continue
    }
}
