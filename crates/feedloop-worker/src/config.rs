// Worker process configuration
// Decision: Missing variables fall back to defaults, malformed ones fail startup

use std::str::FromStr;
use std::time::Duration;

use feedloop_jobs::{BackoffPolicy, WorkerPoolConfig, WorkerPoolError};

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({message})")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error(transparent)]
    Pool(#[from] WorkerPoolError),
}

/// Configuration for the worker process
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub pool: WorkerPoolConfig,
    pub backoff: BackoffPolicy,
    /// Feeds to enqueue a fetch job for on startup
    pub seed_feeds: Vec<i64>,
    /// Users to enqueue training and scoring jobs for on startup
    pub seed_users: Vec<i64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            backoff: BackoffPolicy::exponential(),
            seed_feeds: vec![],
            seed_users: vec![],
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut pool = defaults.pool;
        let mut backoff = defaults.backoff;

        if let Some(concurrency) = parse(&lookup, "WORKER_CONCURRENCY")? {
            pool.concurrency = concurrency;
        }
        if let Some(ms) = parse(&lookup, "WORKER_POLL_INTERVAL_MS")? {
            pool.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, "WORKER_STALE_LEASE_SECS")? {
            pool.stale_lease_threshold = Some(Duration::from_secs(secs));
        }

        if let Some(ms) = parse(&lookup, "WORKER_RETRY_INITIAL_MS")? {
            backoff = backoff.with_initial_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(&lookup, "WORKER_RETRY_MAX_MS")? {
            backoff = backoff.with_max_interval(Duration::from_millis(ms));
        }
        if let Some(failures) = parse(&lookup, "WORKER_DISABLE_AFTER")? {
            backoff = backoff.with_disable_after(failures);
        }
        if backoff.max_interval < backoff.initial_interval {
            return Err(ConfigError::Invalid {
                var: "WORKER_RETRY_MAX_MS",
                value: backoff.max_interval.as_millis().to_string(),
                message: "must not be below WORKER_RETRY_INITIAL_MS".to_string(),
            });
        }

        pool.validate()?;

        Ok(Self {
            pool,
            backoff,
            seed_feeds: parse_list(&lookup, "WORKER_SEED_FEEDS")?,
            seed_users: parse_list(&lookup, "WORKER_SEED_USERS")?,
        })
    }
}

fn parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: value.clone(),
            message: e.to_string(),
        })
}

fn parse_list<F>(lookup: &F, var: &'static str) -> Result<Vec<i64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(vec![]);
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                var,
                value: value.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
