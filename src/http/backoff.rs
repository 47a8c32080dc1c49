//! Retry policy, delay computation and the injectable sleep and jitter seams.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default attempts per request, first attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 15_000;
/// Default jitter added on top of the exponential delay, in percent.
pub const DEFAULT_JITTER_PERCENT: u64 = 20;
/// Default cap on an upstream `Retry-After` value.
pub const DEFAULT_MAX_RETRY_AFTER_SECS: u64 = 60;

/// Bounded exponential backoff with random jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Jitter span as a percentage of the exponential delay.
    pub jitter_percent: u64,
    /// Upper bound for a delay requested through `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_percent: DEFAULT_JITTER_PERCENT,
            max_retry_after: Duration::from_secs(DEFAULT_MAX_RETRY_AFTER_SECS),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `base * 2^(retry-1)` capped at `max_delay`, without jitter.
    pub fn exponential_delay(&self, retry: u32) -> Duration {
        let exponential = duration_ms(self.base_delay)
            .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        Duration::from_millis(exponential.min(duration_ms(self.max_delay)))
    }

    /// Delay before retry number `retry` (1 for the first retry).
    ///
    /// The exponential delay plus a `jitter` sample of up to
    /// `jitter_percent` of it, capped at `max_delay`.
    pub fn backoff_delay(&self, retry: u32, jitter: &dyn Jitter) -> Duration {
        let base_ms = duration_ms(self.base_delay);
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        let span = exponential
            .saturating_mul(self.jitter_percent)
            .checked_div(100)
            .unwrap_or(0);
        let extra = jitter.sample(span).min(span);
        Duration::from_millis(
            exponential
                .saturating_add(extra)
                .min(duration_ms(self.max_delay)),
        )
    }

    /// Clamp an upstream `Retry-After` request to the policy bound.
    pub fn clamp_retry_after(&self, requested: Duration) -> Duration {
        requested.min(self.max_retry_after)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc).signed_duration_since(now);
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Sleep seam so retry timing can be observed without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// Source of backoff jitter.
pub trait Jitter: Send + Sync {
    /// Pick a value in `0..=span_ms`.
    fn sample(&self, span_ms: u64) -> u64;
}

/// [`Jitter`] drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, span_ms: u64) -> u64 {
        rand::thread_rng().gen_range(0..=span_ms)
    }
}

/// [`Jitter`] from a seeded generator; equal seeds give equal sequences.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Generator seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Jitter for SeededJitter {
    fn sample(&self, span_ms: u64) -> u64 {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0..=span_ms)
    }
}

/// [`Jitter`] that always adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _span_ms: u64) -> u64 {
        0
    }
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
