use std::time::Duration;

/// Delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `min(base * 2^(attempt - 1), max)`
    Exponential { base: Duration, max: Duration },
    Fixed(Duration),
}

impl Backoff {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map(|delay| delay.min(max))
                    .unwrap_or(max)
            }
        }
    }

    /// `(base, max)` in milliseconds, as stored on a job row. A fixed delay
    /// is an exponential one whose base already equals its cap.
    pub fn as_millis_pair(&self) -> (i64, i64) {
        match *self {
            Backoff::Fixed(delay) => {
                let ms = delay.as_millis() as i64;
                (ms, ms)
            }
            Backoff::Exponential { base, max } => (base.as_millis() as i64, max.as_millis() as i64),
        }
    }

    pub fn from_millis_pair(base_ms: i64, max_ms: i64) -> Self {
        let base = Duration::from_millis(base_ms.max(0) as u64);
        let max = Duration::from_millis(max_ms.max(0) as u64);
        if base >= max {
            Backoff::Fixed(max)
        } else {
            Backoff::Exponential { base, max }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(300),
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// What to do after `attempts_made` attempts have failed.
    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry(self.backoff.delay(attempts_made))
        }
    }
}
