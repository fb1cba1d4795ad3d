//! Capture loop that drives a [`TurnDetector`] from a live recorder.
//!
//! The loop samples the recorder level on a `tokio::time::interval`, so tests
//! run it under paused time without any real waiting. Time is read through the
//! injected [`Clock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::TurnDetectorError;
use super::config::TurnDetectorConfig;
use super::detector::{FinalizeReason, TickDecision, TurnDetector};
use crate::core::retry::RetryPolicy;

/// Time source for the capture loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's timer, which honours paused time in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Errors reported by an [`AudioCapture`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Recorder unavailable: {0}")]
    Unavailable(String),
    #[error("Recorder read failed: {0}")]
    ReadFailed(String),
}

/// Audio handed off at the end of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    /// Base64 encoded recording
    pub base64: String,
    /// Container mime type, e.g. "audio/m4a"
    pub mime: String,
    /// Recording duration
    pub duration: Duration,
}

/// A microphone recorder as seen by the capture loop.
#[async_trait]
pub trait AudioCapture: Send {
    /// Begin recording.
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Current input level in dBFS, or `None` when the platform can't meter.
    async fn level(&mut self) -> Result<Option<f32>, CaptureError>;

    /// Stop recording and return what was captured.
    async fn stop(&mut self) -> Result<CapturedAudio, CaptureError>;
}

/// Result of one listening phase.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// A finished utterance ready to send.
    Utterance {
        audio: CapturedAudio,
        reason: FinalizeReason,
    },
    /// Nothing worth sending.
    NoTurn,
}

/// Single-flight guard shared by everything that may start a capture.
#[derive(Debug, Clone, Default)]
pub struct ListeningGate {
    listening: Arc<AtomicBool>,
}

impl ListeningGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Claim the gate. The claim is released when the returned guard drops.
    pub fn try_acquire(&self) -> Result<ListeningGuard, TurnDetectorError> {
        self.listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TurnDetectorError::AlreadyListening)?;
        Ok(ListeningGuard {
            listening: self.listening.clone(),
        })
    }
}

/// RAII claim on a [`ListeningGate`].
#[derive(Debug)]
pub struct ListeningGuard {
    listening: Arc<AtomicBool>,
}

impl Drop for ListeningGuard {
    fn drop(&mut self) {
        self.listening.store(false, Ordering::Release);
    }
}

/// Drives one [`TurnDetector`] against a recorder.
pub struct CaptureLoop {
    detector: TurnDetector,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    gate: ListeningGate,
}

impl CaptureLoop {
    pub fn new(config: TurnDetectorConfig, retry: RetryPolicy) -> Self {
        Self::with_clock(config, retry, Arc::new(TokioClock))
    }

    pub fn with_clock(config: TurnDetectorConfig, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            detector: TurnDetector::new(config),
            clock,
            retry,
            gate: ListeningGate::new(),
        }
    }

    /// Share an existing gate so several loops can't listen at once.
    pub fn with_gate(mut self, gate: ListeningGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &ListeningGate {
        &self.gate
    }

    pub fn detector(&self) -> &TurnDetector {
        &self.detector
    }

    /// Listen for one utterance.
    ///
    /// Cancelling `cancel` stops the recorder, resets the detector and yields
    /// [`TurnOutcome::NoTurn`].
    pub async fn listen<A: AudioCapture>(
        &mut self,
        capture: &mut A,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnDetectorError> {
        let _guard = self.gate.try_acquire()?;
        self.detector.begin()?;

        let outcome = self.run_phase(capture, cancel).await;
        self.detector.reset();
        outcome
    }

    async fn run_phase<A: AudioCapture>(
        &mut self,
        capture: &mut A,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnDetectorError> {
        let mut backoff = self.retry.backoff();
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Ok(TurnOutcome::NoTurn),
                result = capture.start() => result,
            };
            match attempt {
                Ok(()) => break,
                Err(e) => match backoff.on_failure() {
                    Some(delay) => {
                        warn!(retry = backoff.failures(), "Recorder start failed: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(TurnOutcome::NoTurn),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => return Err(TurnDetectorError::Capture(e.to_string())),
                },
            }
        }
        backoff.on_success();

        let started_at = self.clock.now();
        let mut ticker = tokio::time::interval(self.detector.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Capture cancelled");
                    if let Err(e) = capture.stop().await {
                        debug!("Recorder stop after cancel failed: {}", e);
                    }
                    return Ok(TurnOutcome::NoTurn);
                }
                _ = ticker.tick() => {}
            }

            let level = match capture.level().await {
                Ok(level) => {
                    backoff.on_success();
                    level
                }
                Err(e) => match backoff.on_failure() {
                    Some(delay) => {
                        warn!(retry = backoff.failures(), "Level read failed: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                let _ = capture.stop().await;
                                return Ok(TurnOutcome::NoTurn);
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    None => {
                        let _ = capture.stop().await;
                        return Err(TurnDetectorError::Capture(e.to_string()));
                    }
                },
            };

            let elapsed = self.clock.now().saturating_duration_since(started_at);
            match self.detector.tick(level, elapsed) {
                TickDecision::Continue => {}
                TickDecision::Abandon => {
                    info!(elapsed_ms = elapsed.as_millis() as u64, "No usable speech heard, abandoning turn");
                    let _ = capture.stop().await;
                    return Ok(TurnOutcome::NoTurn);
                }
                TickDecision::Finalize(reason) => {
                    let audio = capture
                        .stop()
                        .await
                        .map_err(|e| TurnDetectorError::Capture(e.to_string()))?;

                    let min_len = self.detector.config().min_payload_base64_len;
                    if audio.base64.len() < min_len {
                        debug!(
                            len = audio.base64.len(),
                            min_len, "Captured payload too short, dropping"
                        );
                        return Ok(TurnOutcome::NoTurn);
                    }
                    return Ok(TurnOutcome::Utterance { audio, reason });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Recorder that replays a scripted level sequence.
    struct ScriptedCapture {
        levels: VecDeque<Result<Option<f32>, CaptureError>>,
        tail: Option<f32>,
        start_failures: u32,
        payload_len: usize,
        stopped: bool,
    }

    impl ScriptedCapture {
        fn new(levels: Vec<Result<Option<f32>, CaptureError>>, tail: Option<f32>) -> Self {
            Self {
                levels: levels.into(),
                tail,
                start_failures: 0,
                payload_len: 4096,
                stopped: false,
            }
        }
    }

    #[async_trait]
    impl AudioCapture for ScriptedCapture {
        async fn start(&mut self) -> Result<(), CaptureError> {
            if self.start_failures > 0 {
                self.start_failures -= 1;
                return Err(CaptureError::Unavailable("mic busy".into()));
            }
            Ok(())
        }

        async fn level(&mut self) -> Result<Option<f32>, CaptureError> {
            self.levels.pop_front().unwrap_or(Ok(self.tail))
        }

        async fn stop(&mut self) -> Result<CapturedAudio, CaptureError> {
            self.stopped = true;
            Ok(CapturedAudio {
                base64: "A".repeat(self.payload_len),
                mime: "audio/m4a".to_string(),
                duration: Duration::from_secs(2),
            })
        }
    }

    fn speech_then_silence() -> Vec<Result<Option<f32>, CaptureError>> {
        let mut levels: Vec<_> = (0..8).map(|_| Ok(Some(-20.0))).collect();
        levels.extend((0..20).map(|_| Ok(Some(-70.0))));
        levels
    }

    fn capture_loop() -> CaptureLoop {
        CaptureLoop::new(TurnDetectorConfig::default(), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_returns_utterance() {
        let mut capture = ScriptedCapture::new(speech_then_silence(), Some(-70.0));
        let mut lp = capture_loop();

        let outcome = lp
            .listen(&mut capture, &CancellationToken::new())
            .await
            .expect("listen");

        match outcome {
            TurnOutcome::Utterance { audio, reason } => {
                assert_eq!(reason, FinalizeReason::TrailingSilence);
                assert_eq!(audio.mime, "audio/m4a");
            }
            other => panic!("Expected utterance, got {other:?}"),
        }
        assert!(capture.stopped);
        assert!(!lp.gate().is_listening());
        assert!(!lp.detector().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_abandons_on_silence() {
        let mut capture = ScriptedCapture::new(vec![], Some(-80.0));
        let outcome = capture_loop()
            .listen(&mut capture, &CancellationToken::new())
            .await
            .expect("listen");
        assert_eq!(outcome, TurnOutcome::NoTurn);
        assert!(capture.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_payload_is_dropped() {
        let mut capture = ScriptedCapture::new(speech_then_silence(), Some(-70.0));
        capture.payload_len = 50;
        let outcome = capture_loop()
            .listen(&mut capture, &CancellationToken::new())
            .await
            .expect("listen");
        assert_eq!(outcome, TurnOutcome::NoTurn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failures_are_retried() {
        let mut capture = ScriptedCapture::new(speech_then_silence(), Some(-70.0));
        capture.start_failures = 2;
        let outcome = capture_loop()
            .listen(&mut capture, &CancellationToken::new())
            .await
            .expect("listen");
        assert!(matches!(outcome, TurnOutcome::Utterance { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failures_beyond_policy_surface_error() {
        let levels = (0..10)
            .map(|_| Err(CaptureError::ReadFailed("meter".into())))
            .collect();
        let mut capture = ScriptedCapture::new(levels, Some(-70.0));
        let result = capture_loop()
            .listen(&mut capture, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TurnDetectorError::Capture(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_failure_recovers() {
        let mut levels = vec![
            Err(CaptureError::ReadFailed("glitch".into())),
            Err(CaptureError::ReadFailed("glitch".into())),
        ];
        levels.extend(speech_then_silence());
        let mut capture = ScriptedCapture::new(levels, Some(-70.0));
        let outcome = capture_loop()
            .listen(&mut capture, &CancellationToken::new())
            .await
            .expect("listen");
        assert!(matches!(outcome, TurnOutcome::Utterance { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_capture() {
        let mut capture = ScriptedCapture::new(vec![], Some(-20.0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let outcome = capture_loop()
            .listen(&mut capture, &cancel)
            .await
            .expect("listen");
        assert_eq!(outcome, TurnOutcome::NoTurn);
        assert!(capture.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_start_backoff() {
        let mut capture = ScriptedCapture::new(vec![], Some(-70.0));
        capture.start_failures = u32::MAX;
        let retry = RetryPolicy {
            initial_delay_ms: 10_000,
            max_delay_ms: 10_000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let began = Instant::now();
        let outcome = CaptureLoop::new(TurnDetectorConfig::default(), retry)
            .listen(&mut capture, &cancel)
            .await
            .expect("listen");
        assert_eq!(outcome, TurnOutcome::NoTurn);
        assert!(began.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breath_blip_does_not_hang_listen() {
        let mut levels: Vec<_> = (0..2).map(|_| Ok(Some(-20.0))).collect();
        levels.extend((0..3).map(|_| Ok(Some(-80.0))));
        let mut capture = ScriptedCapture::new(levels, Some(-80.0));

        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            capture_loop().listen(&mut capture, &CancellationToken::new()),
        )
        .await
        .expect("listen must end within the listening window")
        .expect("listen");
        assert_eq!(outcome, TurnOutcome::NoTurn);
        assert!(capture.stopped);
    }

    #[tokio::test]
    async fn test_shared_gate_rejects_second_capture() {
        let gate = ListeningGate::new();
        let _held = gate.try_acquire().expect("first claim");

        let mut lp = capture_loop().with_gate(gate.clone());
        let mut capture = ScriptedCapture::new(vec![], Some(-70.0));
        let result = lp.listen(&mut capture, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TurnDetectorError::AlreadyListening)));
        assert!(!lp.detector().is_active());
    }

    #[test]
    fn test_gate_released_on_drop() {
        let gate = ListeningGate::new();
        {
            let _guard = gate.try_acquire().expect("claim");
            assert!(gate.is_listening());
            assert!(gate.try_acquire().is_err());
        }
        assert!(!gate.is_listening());
    }
}
