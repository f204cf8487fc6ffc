//! Job record definition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted unit of work
///
/// The worker pool only looks at the identity and eligibility fields; the
/// `payload` is handed to the handler untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,

    /// Selects which handler processes the job
    pub job_type: String,

    /// Handler-specific data
    pub payload: serde_json::Value,

    /// Disabled jobs are never claimed
    pub enabled: bool,

    /// Length of the current failure streak
    pub consecutive_failures: u32,

    /// Earliest time at which the job may be claimed
    pub next_run_at: DateTime<Utc>,

    /// Set while a lease is held
    pub running_since: Option<DateTime<Utc>>,

    pub last_run_at: Option<DateTime<Utc>>,

    /// Error text of the last run, if it failed
    pub last_error: Option<String>,
}

impl Job {
    /// Build a pending job from a definition
    pub fn from_definition(definition: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type: definition.job_type,
            payload: definition.payload,
            enabled: true,
            consecutive_failures: 0,
            next_run_at: definition.run_at.unwrap_or(now),
            running_since: None,
            last_run_at: None,
            last_error: None,
        }
    }

    /// Whether the job may be claimed at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.running_since.is_none() && self.next_run_at <= now
    }

    /// Whether a lease is currently held
    pub fn is_leased(&self) -> bool {
        self.running_since.is_some()
    }
}

/// Definition of a job to be enqueued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    /// First eligible time; `None` means immediately
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            run_at: None,
        }
    }

    /// Delay the first run until `run_at`
    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }
}

/// Result of one execution, reported through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

impl JobOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_new_job_is_immediately_eligible() {
        let now = Utc::now();
        let job = Job::from_definition(NewJob::new("fetch_feed", json!({"feed_id": 1})), now);

        assert!(job.enabled);
        assert_eq!(job.consecutive_failures, 0);
        assert_eq!(job.next_run_at, now);
        assert!(job.is_eligible(now));
    }

    #[test]
    fn test_eligibility_rules() {
        let now = Utc::now();
        let mut job = Job::from_definition(NewJob::new("train_model", json!({})), now);

        job.next_run_at = now + Duration::seconds(5);
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + Duration::seconds(5)));

        job.next_run_at = now;
        job.running_since = Some(now);
        assert!(job.is_leased());
        assert!(!job.is_eligible(now));

        job.running_since = None;
        job.enabled = false;
        assert!(!job.is_eligible(now));
    }

    #[test]
    fn test_delayed_definition() {
        let now = Utc::now();
        let later = now + Duration::minutes(10);
        let job = Job::from_definition(NewJob::new("predict_scores", json!({})).run_at(later), now);

        assert_eq!(job.next_run_at, later);
        assert!(!job.is_eligible(now));
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(JobOutcome::Succeeded.is_success());
        let failed = JobOutcome::failed("timeout");
        assert!(!failed.is_success());
        assert_eq!(
            failed,
            JobOutcome::Failed {
                error: "timeout".to_string()
            }
        );
    }
}
