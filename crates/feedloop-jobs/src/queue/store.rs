//! JobQueue trait definition

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::job::{Job, JobOutcome};

/// Error type for queue operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Completion or release for a job that holds no lease
    #[error("job is not leased: {0}")]
    NotLeased(Uuid),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),
}

/// Claim protocol between the worker pool and the job store
///
/// Implementations must be thread-safe. `claim_next_job` must be atomic: a
/// job returned to one caller can't be returned to any other caller, in this
/// or another process, until its lease is cleared by `complete_job`,
/// `release_job` or `reclaim_stale_leases`.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Lease the next eligible job, if any
    async fn claim_next_job(&self) -> Result<Option<Job>, QueueError>;

    /// Record the outcome of a leased job and clear its lease
    ///
    /// Returns the updated record.
    async fn complete_job(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<Job, QueueError>;

    /// Clear a lease without running the job
    ///
    /// Failure counters and `next_run_at` are left untouched.
    async fn release_job(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Clear leases held longer than `threshold`
    ///
    /// Leases on jobs listed in `active` are still being worked by the caller
    /// and must be kept however old they are. Returns the ids of the
    /// reclaimed jobs.
    async fn reclaim_stale_leases(
        &self,
        _threshold: Duration,
        _active: &[Uuid],
    ) -> Result<Vec<Uuid>, QueueError> {
        Ok(vec![])
    }
}
