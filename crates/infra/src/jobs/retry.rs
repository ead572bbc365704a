//! Retry/backoff policy.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lotwise_ai::JobError;

use super::types::Job;

/// Source of backoff jitter, uniform in `[0, 1)`.
pub trait JitterSource: Send + Sync + 'static {
    fn sample(&self) -> f64;
}

/// Thread-local RNG jitter for production use.
#[derive(Debug, Default, Copy, Clone)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Reproducible jitter from a fixed seed.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .random::<f64>()
    }
}

/// Always returns the same value (clamped into `[0, 1)`).
#[derive(Debug, Copy, Clone)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Back to PENDING, claimable again at `next_available_at`.
    Retry {
        next_available_at: DateTime<Utc>,
        attempts: u32,
    },
    /// Terminal FAILED.
    Fail { attempts: u32 },
}

/// Exponential backoff with multiplicative jitter:
/// `delay = min(base^attempts * (1 + jitter) seconds, max_delay)`.
#[derive(Clone)]
pub struct RetryPolicy {
    base: f64,
    max_delay: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRngJitter))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("base", &self.base)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl RetryPolicy {
    pub const DEFAULT_BASE: f64 = 2.0;

    /// Upper bound on a single backoff delay, in seconds (one day).
    pub const DEFAULT_MAX_DELAY_SECS: i64 = 86_400;

    pub fn new(jitter: Arc<dyn JitterSource>) -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            max_delay: Duration::seconds(Self::DEFAULT_MAX_DELAY_SECS),
            jitter,
        }
    }

    pub fn with_base(mut self, base: f64) -> Self {
        self.base = base;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(Duration::zero());
        self
    }

    /// Delay before a job that has failed `attempts` times becomes claimable again.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.base.powi(exponent) * (1.0 + self.jitter.sample());
        let cap_millis = self.max_delay.num_milliseconds();
        // NaN and infinities from huge exponents land on the cap.
        let millis = (secs * 1000.0).round();
        let millis = if millis.is_finite() && millis >= 0.0 {
            (millis.min(cap_millis as f64)) as i64
        } else {
            cap_millis
        };
        Duration::milliseconds(millis)
    }

    /// Decide the next state of `job` after `error` at time `now`.
    ///
    /// Fatal errors skip the retry budget entirely and leave `attempts` as is.
    pub fn on_failure(&self, job: &Job, error: &JobError, now: DateTime<Utc>) -> FailureDecision {
        if !error.is_retryable() {
            return FailureDecision::Fail {
                attempts: job.attempts,
            };
        }

        let attempts = job.attempts.saturating_add(1);
        if attempts < job.max_attempts {
            FailureDecision::Retry {
                next_available_at: now
                    .checked_add_signed(self.backoff(attempts))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                attempts,
            }
        } else {
            FailureDecision::Fail { attempts }
        }
    }
}
