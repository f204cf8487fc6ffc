//! Backoff policy for failing jobs

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::duration_millis;

/// Smallest push-out applied after a failure, so a failing job can never
/// become eligible again at the instant it failed.
const MIN_FAILURE_DELAY: Duration = Duration::from_millis(1);

/// Maps a job's failure streak to its next eligible time
///
/// Exponential with a cap by default. `disable_after` optionally turns a job
/// off once its streak reaches the threshold.
///
/// # Example
///
/// ```
/// use feedloop_jobs::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential()
///     .with_initial_interval(Duration::from_secs(30))
///     .with_max_interval(Duration::from_secs(3600))
///     .with_disable_after(20);
///
/// // First failure waits ~30s, second ~60s, third ~120s, ...
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per additional failure
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10%
    pub jitter: f64,

    /// Disable the job once the streak reaches this many failures
    #[serde(default)]
    pub disable_after: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// Exponential backoff with defaults
    ///
    /// - 1 minute initial interval
    /// - 1 hour max interval
    /// - 2x coefficient
    /// - 10% jitter
    /// - never auto-disable
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(3600),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            disable_after: None,
        }
    }

    /// Same delay after every failure
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            disable_after: None,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Disable jobs whose failure streak reaches `failures`
    pub fn with_disable_after(mut self, failures: u32) -> Self {
        self.disable_after = Some(failures.max(1));
        self
    }

    /// Delay to apply after the `consecutive_failures`-th failure in a row
    ///
    /// Out-of-range factors (for example from a deserialized policy) are
    /// clamped the same way the builders clamp them.
    pub fn delay_for_failures(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let coefficient = if self.backoff_coefficient.is_nan() {
            1.0
        } else {
            self.backoff_coefficient.max(1.0)
        };
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64()).max(0.0);

        let jittered = if jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Next eligible time after a failure at `failed_at`
    ///
    /// Always strictly later than `failed_at`.
    pub fn next_run_at(
        &self,
        consecutive_failures: u32,
        failed_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = self
            .delay_for_failures(consecutive_failures)
            .max(MIN_FAILURE_DELAY);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        failed_at
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether a job with this streak should be disabled
    pub fn should_disable(&self, consecutive_failures: u32) -> bool {
        self.disable_after
            .is_some_and(|threshold| consecutive_failures >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.initial_interval, Duration::from_secs(60));
        assert_eq!(policy.max_interval, Duration::from_secs(3600));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert!(policy.disable_after.is_none());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy::exponential()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_failures(0), Duration::ZERO);
        assert_eq!(policy.delay_for_failures(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_failures(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_failures(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_failures(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_failures(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(10)).with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_for_failures(3);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_next_run_is_strictly_later() {
        let now = Utc::now();
        let zero = BackoffPolicy::fixed(Duration::ZERO);
        assert!(zero.next_run_at(1, now) > now);

        let policy = BackoffPolicy::fixed(Duration::from_secs(30));
        assert_eq!(policy.next_run_at(1, now), now + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_next_run_saturates() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(u64::MAX / 4));
        let now = Utc::now();
        assert!(policy.next_run_at(1, now) > now);
    }

    #[test]
    fn test_disable_threshold() {
        let policy = BackoffPolicy::exponential();
        assert!(!policy.should_disable(1_000));

        let policy = policy.with_disable_after(3);
        assert!(!policy.should_disable(2));
        assert!(policy.should_disable(3));
        assert!(policy.should_disable(4));
    }

    #[test]
    fn test_deserialized_factors_are_clamped() {
        let policy: BackoffPolicy = serde_json::from_value(serde_json::json!({
            "initial_interval": 1000,
            "max_interval": 60000,
            "backoff_coefficient": -2.0,
            "jitter": 7.5
        }))
        .unwrap();

        for failures in 1..5 {
            let delay = policy.delay_for_failures(failures);
            assert!(delay <= Duration::from_secs(2));
        }
        let now = Utc::now();
        assert!(policy.next_run_at(2, now) > now);

        let policy = BackoffPolicy {
            backoff_coefficient: f64::NAN,
            jitter: f64::INFINITY,
            ..BackoffPolicy::fixed(Duration::from_secs(10))
        };
        assert_eq!(policy.delay_for_failures(3), Duration::from_secs(10));
    }

    #[test]
    fn test_serialization() {
        let policy = BackoffPolicy::exponential().with_disable_after(10);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval\":60000"));

        let parsed: BackoffPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
