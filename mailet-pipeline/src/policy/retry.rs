//! Retry policy for transient mailet failures.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// When and how often a mail is re-run after a transient failure.
///
/// The attempt counter is checked before it is incremented: a mail whose
/// counter is still below `max_attempts` is re-spooled, anything else is
/// dead-lettered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Transient failures tolerated before a mail is dead-lettered
    ///
    /// Default: 5
    pub max_attempts: u32,

    /// First backoff step, doubled after every further failure
    ///
    /// Default: 60
    pub base_delay_secs: u64,

    /// Upper bound on a single backoff step
    ///
    /// Default: 3600
    pub max_delay_secs: u64,

    /// Fraction of the step added or removed at random, clamped to `0..=1`
    ///
    /// Default: 0.1
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 60,
            max_delay_secs: 3600,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Whether a mail that has failed `attempt_count` times before this
    /// failure gets another run
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        self.max_attempts > attempt_count
    }

    /// Wait before the run following failure number `attempt_count + 1`
    #[must_use]
    pub fn delay(&self, attempt_count: u32) -> Duration {
        let step = backoff_step(attempt_count, self.base_delay_secs, self.max_delay_secs);
        Duration::from_secs(apply_jitter(step, self.jitter))
    }

    /// Earliest time (ms since epoch) the retry may run
    #[must_use]
    pub fn next_attempt_at(&self, attempt_count: u32, now_ms: u64) -> u64 {
        let delay = u64::try_from(self.delay(attempt_count).as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_add(delay)
    }
}

/// `min(base * 2^failures, max)`, where `failures` counts the failures seen
/// before the current one
#[must_use]
pub fn backoff_step(failures: u32, base_secs: u64, max_secs: u64) -> u64 {
    1_u64
        .checked_shl(failures)
        .map_or(max_secs, |factor| base_secs.saturating_mul(factor))
        .min(max_secs)
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn apply_jitter(step_secs: u64, jitter: f64) -> u64 {
    let spread = if jitter.is_finite() {
        jitter.abs().min(1.0)
    } else {
        0.0
    };
    if spread == 0.0 || step_secs == 0 {
        return step_secs;
    }

    let step = step_secs as f64;
    let offset: f64 = rand::rng().random_range(-spread..=spread);
    step.mul_add(offset, step).round().max(0.0) as u64
}
