//! Bounded exponential backoff shared by capture start and provider connects.
//!
//! A single [`RetryPolicy`] describes how many attempts are allowed and how the
//! delay between attempts grows. [`Backoff`] is the stateful cursor over that
//! policy: every failure moves it forward, one success resets it to zero delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry configuration for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failure.
    /// Set to 0 to disable retrying.
    /// Default: 4
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds).
    /// Default: 250ms
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    /// Default: 4000ms
    pub max_delay_ms: u64,

    /// Multiplier applied per retry.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Spread delays by up to 25% to avoid synchronized retries.
    /// Default: false
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay_ms: 250,
            max_delay_ms: 4000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// Retry 0 means "no failure yet" and always has zero delay.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier.max(1.0) as f64;
        let delay = (base * multiplier.powi(retry.saturating_sub(1) as i32))
            .min(self.max_delay_ms as f64);

        let delay = if self.jitter {
            (delay + jitter_offset(delay * 0.25)).clamp(0.0, self.max_delay_ms as f64)
        } else {
            delay
        };

        Duration::from_millis(delay as u64)
    }

    /// Whether retry number `retry` (1-based) is still allowed.
    pub fn allows(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }

    /// Create a fresh [`Backoff`] cursor for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            failures: 0,
        }
    }

    /// Run `op` until it succeeds or the policy is exhausted.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        loop {
            match op().await {
                Ok(value) => {
                    if backoff.failures() > 0 {
                        debug!(label, retries = backoff.failures(), "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) => match backoff.on_failure() {
                    Some(delay) => {
                        warn!(
                            label,
                            retry = backoff.failures(),
                            delay_ms = delay.as_millis() as u64,
                            "Transient failure, retrying: {}",
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(label, "Giving up after {} retries: {}", self.max_retries, e);
                        return Err(e);
                    }
                },
            }
        }
    }
}

/// Stateful position within a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    /// Record a failure. Returns the delay to wait before trying again,
    /// or `None` when the policy is exhausted.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.policy.allows(self.failures) {
            Some(self.policy.delay_for(self.failures))
        } else {
            None
        }
    }

    /// Record a success, resetting the delay to zero.
    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay that applies right now.
    pub fn current_delay(&self) -> Duration {
        self.policy.delay_for(self.failures)
    }
}

/// Pseudo-random offset in `-range..=range`, seeded from the wall clock.
fn jitter_offset(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}
