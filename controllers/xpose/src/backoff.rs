//! # Requeue Backoff
//!
//! Decides how long a failed key waits before it becomes visible to workers
//! again. Two limiters are combined and the longer delay wins:
//!
//! - a per-key exponential backoff: `base * 2^failures`, capped at `max`
//!   (defaults 5ms, 10ms, 20ms, ... up to 1000s), reset by `forget`;
//! - a process-wide token bucket shared by every key (default 10 qps,
//!   burst 100), which only bites when many keys fail at once.

use crate::key::ResourceKey;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tunables for [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Delay after the first failure of a key
    pub base_delay: Duration,
    /// Ceiling for the per-key delay
    pub max_delay: Duration,
    /// Sustained requeues per second across all keys
    pub qps: f64,
    /// Requeues allowed in a burst before `qps` applies
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

/// Per-key exponential backoff calculator
///
/// Each consecutive failure of the same key doubles its delay until
/// `max_delay` is reached. Keys are independent of each other.
#[derive(Debug, Clone)]
pub struct ItemExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    failures: HashMap<ResourceKey, u32>,
}

impl ItemExponentialBackoff {
    /// Create a backoff starting at `base_delay` and capped at `max_delay`
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: HashMap::new(),
        }
    }

    /// Get the next delay for `key` and record one more failure
    pub fn next_delay(&mut self, key: &ResourceKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = 2_u32
            .checked_pow(*failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay));
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of failures recorded for `key` since it was last forgotten
    #[must_use]
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset `key` to the initial state
    pub fn forget(&mut self, key: &ResourceKey) {
        self.failures.remove(key);
    }
}

/// Token bucket shared by all keys.
#[derive(Debug, Clone)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl BucketRateLimiter {
    /// Create a full bucket
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            tokens: burst,
            last: Instant::now(),
        }
    }

    /// Reserve one token and return how long the caller must wait for it
    pub fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.tokens -= 1.0;

        if self.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

/// Combined limiter used by the event queue
#[derive(Debug, Clone)]
pub struct RateLimiter {
    items: ItemExponentialBackoff,
    bucket: BucketRateLimiter,
}

impl RateLimiter {
    /// Build a limiter from its configuration
    #[must_use]
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            items: ItemExponentialBackoff::new(config.base_delay, config.max_delay),
            bucket: BucketRateLimiter::new(config.qps, config.burst),
        }
    }

    /// How long `key` should wait before being retried
    pub fn when(&mut self, key: &ResourceKey) -> Duration {
        let item_delay = self.items.next_delay(key);
        let bucket_delay = self.bucket.reserve();
        item_delay.max(bucket_delay)
    }

    /// Stop tracking `key`; its next failure starts from the base delay again
    pub fn forget(&mut self, key: &ResourceKey) {
        self.items.forget(key);
    }

    /// Consecutive failures recorded for `key`
    #[must_use]
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.items.failures(key)
    }
}
