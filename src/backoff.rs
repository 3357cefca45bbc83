use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff: `base * 2^attempt`, optionally capped.
///
/// `attempt` is zero-based, so the first retry waits exactly `base`.
/// The shift is clamped and the multiply saturates, so very large attempt
/// counts produce `u64::MAX` milliseconds instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let factor = 1u64 << attempt.min(63);
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// True while `attempt` consecutive failures still leave room for another try.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            DEFAULT_MAX_ATTEMPTS,
        )
    }
}
