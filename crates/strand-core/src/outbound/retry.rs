//! Retry policy: decides how often and how long to back off between sends.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for failed sends.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Ceiling for a single delay.
    pub max_delay: Duration,

    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u64,

    /// Fraction of the delay that is randomized, in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy for an outbound channel: 1s doubling up to 20s.
    pub fn for_retries(max_retries: u64) -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(20),
            max_retries,
            jitter: 0.5,
        }
    }

    /// Total number of sends allowed, first attempt included.
    pub fn max_attempts(&self) -> u64 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another send is allowed after `attempts` sends failed.
    pub fn should_retry(&self, attempts: u64) -> bool {
        attempts < self.max_attempts()
    }

    /// Delay before retry number `retry` (1-indexed), without jitter.
    ///
    /// delay = base_delay * multiplier^(retry - 1), capped at `max_delay`:
    /// 1s, 2s, 4s, 8s, 16s, 20s, 20s, ...
    pub fn next_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// [`RetryPolicy::next_delay`] with up to `jitter` of it randomized
    /// downwards, so retries of concurrent sends spread out.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let delay = self.next_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        delay.mul_f64(factor)
    }
}
