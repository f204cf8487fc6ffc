//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool::WorkerPoolError;
use crate::duration_millis;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of jobs allowed to run at once
    pub concurrency: usize,

    /// Wait between claim attempts while the queue is empty
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Leases older than this are cleared on start and periodically after;
    /// `None` disables reclamation
    #[serde(default, with = "duration_millis::option")]
    pub stale_lease_threshold: Option<Duration>,

    /// How often stale leases are reclaimed
    #[serde(with = "duration_millis")]
    pub reclaim_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            stale_lease_threshold: None,
            reclaim_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(concurrency: usize, poll_interval: Duration) -> Self {
        Self {
            concurrency,
            poll_interval,
            ..Default::default()
        }
    }

    /// Set concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the empty-queue poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reclaim leases held longer than `threshold`
    pub fn with_stale_lease_threshold(mut self, threshold: Duration) -> Self {
        self.stale_lease_threshold = Some(threshold);
        self
    }

    /// Set the reclaim interval
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WorkerPoolError> {
        if self.concurrency == 0 {
            return Err(WorkerPoolError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(WorkerPoolError::InvalidConfig(
                "poll_interval must be positive".into(),
            ));
        }
        if self.stale_lease_threshold.is_some() && self.reclaim_interval.is_zero() {
            return Err(WorkerPoolError::InvalidConfig(
                "reclaim_interval must be positive when reclamation is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.stale_lease_threshold.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new(3, Duration::from_millis(50))
            .with_stale_lease_threshold(Duration::from_secs(600))
            .with_reclaim_interval(Duration::from_secs(30));

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.stale_lease_threshold, Some(Duration::from_secs(600)));
        assert_eq!(config.reclaim_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_validation() {
        assert!(WorkerPoolConfig::default()
            .with_concurrency(0)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::default()
            .with_stale_lease_threshold(Duration::from_secs(1))
            .with_reclaim_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_serialization() {
        let config = WorkerPoolConfig::new(2, Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 250);
        assert!(json["stale_lease_threshold"].is_null());

        let parsed: WorkerPoolConfig = serde_json::from_value(serde_json::json!({
            "concurrency": 8,
            "poll_interval": 100,
            "reclaim_interval": 5000
        }))
        .unwrap();
        assert_eq!(parsed.concurrency, 8);
        assert_eq!(parsed.poll_interval, Duration::from_millis(100));
        assert!(parsed.stale_lease_threshold.is_none());
    }
}
