//! In-memory implementation of JobQueue

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{JobQueue, QueueError};
use crate::job::{Job, JobOutcome, NewJob};
use crate::reliability::BackoffPolicy;

/// In-memory implementation of JobQueue
///
/// All state lives behind one lock, so claiming is atomic within the
/// process. Successful jobs are rescheduled after their type's interval
/// (see [`with_schedule`](Self::with_schedule)); failed jobs are pushed out
/// by the [`BackoffPolicy`].
///
/// # Example
///
/// ```
/// use feedloop_jobs::{BackoffPolicy, InMemoryJobQueue, NewJob};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let queue = InMemoryJobQueue::new(BackoffPolicy::exponential())
///     .with_schedule("fetch_feed", Duration::from_secs(900));
///
/// let id = queue.enqueue(NewJob::new("fetch_feed", json!({"feed_id": 1})));
/// assert!(queue.get(id).is_some());
/// ```
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<Uuid, Job>>,
    backoff: BackoffPolicy,
    default_interval: Duration,
    schedules: HashMap<String, Duration>,
}

impl InMemoryJobQueue {
    /// Interval before a successful job runs again, unless its type has a schedule
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            backoff,
            default_interval: Self::DEFAULT_INTERVAL,
            schedules: HashMap::new(),
        }
    }

    /// Set the reschedule interval after success for one job type
    pub fn with_schedule(mut self, job_type: impl Into<String>, interval: Duration) -> Self {
        self.schedules.insert(job_type.into(), interval);
        self
    }

    /// Set the reschedule interval for job types without their own schedule
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    /// Add a job and return its id
    pub fn enqueue(&self, definition: NewJob) -> Uuid {
        let job = Job::from_definition(definition, Utc::now());
        let id = job.id;
        debug!(job_id = %id, job_type = %job.job_type, "Enqueued job");
        self.jobs.write().insert(id, job);
        id
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().get(&job_id).cloned()
    }

    pub fn remove(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.write().remove(&job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Number of jobs claimable right now
    pub fn eligible_count(&self) -> usize {
        let now = Utc::now();
        self.jobs
            .read()
            .values()
            .filter(|job| job.is_eligible(now))
            .count()
    }

    /// Number of jobs currently leased
    pub fn leased_count(&self) -> usize {
        self.jobs.read().values().filter(|job| job.is_leased()).count()
    }

    /// Enable or disable a job
    pub fn set_enabled(&self, job_id: Uuid, enabled: bool) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        job.enabled = enabled;
        Ok(())
    }

    /// Make a failing job eligible again right away
    ///
    /// Re-enables the job and resets its failure streak.
    pub fn retry_now(&self, job_id: Uuid) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        job.enabled = true;
        job.consecutive_failures = 0;
        job.next_run_at = Utc::now();
        Ok(job.clone())
    }

    /// Jobs whose failure streak is at least `min_failures`, worst first
    pub fn broken_jobs(&self, min_failures: u32) -> Vec<Job> {
        let mut broken: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.consecutive_failures >= min_failures.max(1))
            .cloned()
            .collect();
        broken.sort_by(|a, b| {
            b.consecutive_failures
                .cmp(&a.consecutive_failures)
                .then(a.id.cmp(&b.id))
        });
        broken
    }

    fn success_interval(&self, job_type: &str) -> Duration {
        self.schedules
            .get(job_type)
            .copied()
            .unwrap_or(self.default_interval)
    }
}

fn add_std(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn claim_next_job(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();

        let next = jobs
            .values_mut()
            .filter(|job| job.is_eligible(now))
            .min_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then(a.id.cmp(&b.id)));

        Ok(next.map(|job| {
            job.running_since = Some(now);
            job.clone()
        }))
    }

    async fn complete_job(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<Job, QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        if !job.is_leased() {
            return Err(QueueError::NotLeased(job_id));
        }
        let interval = self.success_interval(&job.job_type);

        job.running_since = None;
        job.last_run_at = Some(now);

        match outcome {
            JobOutcome::Succeeded => {
                job.consecutive_failures = 0;
                job.last_error = None;
                job.next_run_at = add_std(now, interval);
            }
            JobOutcome::Failed { error } => {
                job.consecutive_failures = job.consecutive_failures.saturating_add(1);
                job.last_error = Some(error.clone());
                job.next_run_at = self.backoff.next_run_at(job.consecutive_failures, now);

                if self.backoff.should_disable(job.consecutive_failures) {
                    warn!(
                        job_id = %job_id,
                        job_type = %job.job_type,
                        consecutive_failures = job.consecutive_failures,
                        "Disabling job after repeated failures"
                    );
                    job.enabled = false;
                }
            }
        }

        Ok(job.clone())
    }

    async fn release_job(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        if job.running_since.take().is_none() {
            return Err(QueueError::NotLeased(job_id));
        }
        Ok(())
    }

    async fn reclaim_stale_leases(
        &self,
        threshold: Duration,
        active: &[Uuid],
    ) -> Result<Vec<Uuid>, QueueError> {
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut reclaimed = vec![];
        for job in self.jobs.write().values_mut() {
            if active.contains(&job.id) {
                continue;
            }
            if job.running_since.is_some_and(|since| since <= cutoff) {
                job.running_since = None;
                reclaimed.push(job.id);
            }
        }
        Ok(reclaimed)
    }
}
