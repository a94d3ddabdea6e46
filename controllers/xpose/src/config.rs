//! Controller configuration from environment variables.

use crate::backoff::RateLimiterConfig;
use crate::error::ControllerError;
use std::str::FromStr;
use std::time::Duration;

/// Default number of reconcile workers.
pub const DEFAULT_WORKERS: usize = 1;
/// Default bound on the wait for the initial Deployment list.
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// How long to wait for the cache to sync before giving up
    pub cache_sync_timeout: Duration,
    /// Requeue backoff for failed keys
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: DEFAULT_WORKERS,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Recognised variables: `WATCH_NAMESPACE`, `WORKER_COUNT`,
    /// `CACHE_SYNC_TIMEOUT_SECS`, `BACKOFF_BASE_MS`, `BACKOFF_MAX_SECS`,
    /// `RATE_LIMIT_QPS` and `RATE_LIMIT_BURST`. Unset variables keep their
    /// defaults.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ControllerError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let workers = parse(&lookup, "WORKER_COUNT")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }

        let cache_sync_timeout = parse::<u64, _>(&lookup, "CACHE_SYNC_TIMEOUT_SECS")?
            .map_or(defaults.cache_sync_timeout, Duration::from_secs);
        if cache_sync_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "CACHE_SYNC_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        let limits = defaults.rate_limiter;
        let rate_limiter = RateLimiterConfig {
            base_delay: parse::<u64, _>(&lookup, "BACKOFF_BASE_MS")?
                .map_or(limits.base_delay, Duration::from_millis),
            max_delay: parse::<u64, _>(&lookup, "BACKOFF_MAX_SECS")?
                .map_or(limits.max_delay, Duration::from_secs),
            qps: parse(&lookup, "RATE_LIMIT_QPS")?.unwrap_or(limits.qps),
            burst: parse(&lookup, "RATE_LIMIT_BURST")?.unwrap_or(limits.burst),
        };
        if rate_limiter.base_delay.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "BACKOFF_BASE_MS must be greater than 0".to_string(),
            ));
        }
        if rate_limiter.base_delay > rate_limiter.max_delay {
            return Err(ControllerError::InvalidConfig(
                "BACKOFF_BASE_MS must not exceed BACKOFF_MAX_SECS".to_string(),
            ));
        }
        if !(rate_limiter.qps.is_finite() && rate_limiter.qps > 0.0) || rate_limiter.burst == 0 {
            return Err(ControllerError::InvalidConfig(
                "RATE_LIMIT_QPS and RATE_LIMIT_BURST must be positive".to_string(),
            ));
        }

        Ok(Self {
            namespace,
            workers,
            cache_sync_timeout,
            rate_limiter,
        })
    }
}

fn parse<T, L>(lookup: &L, name: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ControllerError::InvalidConfig(format!("{name}={raw:?}: {e}"))),
    }
}
