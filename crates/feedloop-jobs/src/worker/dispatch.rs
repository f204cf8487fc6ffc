//! Claim-and-refill loop
//!
//! One coordinating task owns the set of running jobs. It claims until every
//! slot is filled or the queue reports empty, then waits for whichever comes
//! first: a job finishing (claim again immediately), the poll interval
//! elapsing after an empty claim, or shutdown. On shutdown it stops claiming
//! and drains the remaining jobs.
//!
//! Stale lease reclamation never touches the jobs this loop is running: their
//! ids stay in [`ActiveJobs`] until the outcome has been written back.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::slots::{SlotGuard, SlotTracker};
use crate::job::{Job, JobError, JobHandler, JobOutcome};
use crate::queue::JobQueue;

/// Running totals since the pool was created
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub claim_attempts: AtomicU64,
    pub jobs_started: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
}

/// Ids of the jobs one claim loop has started and not yet finished
#[derive(Debug, Default)]
struct ActiveJobs {
    ids: Mutex<HashSet<Uuid>>,
}

impl ActiveJobs {
    fn track(self: &Arc<Self>, job_id: Uuid) -> ActiveJob {
        self.ids.lock().insert(job_id);
        ActiveJob {
            active: Arc::clone(self),
            job_id,
        }
    }

    fn snapshot(&self) -> Vec<Uuid> {
        self.ids.lock().iter().copied().collect()
    }
}

/// Membership in [`ActiveJobs`], dropped once the job is done
struct ActiveJob {
    active: Arc<ActiveJobs>,
    job_id: Uuid,
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.active.ids.lock().remove(&self.job_id);
    }
}

/// Why a fill pass stopped claiming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    /// Every slot is occupied
    Full,
    /// The queue had nothing eligible
    Empty,
    /// The claim itself failed
    ClaimFailed,
    /// Shutdown was requested
    Stopped,
}

pub(crate) struct Dispatcher {
    pub queue: Arc<dyn JobQueue>,
    pub handler: Arc<dyn JobHandler>,
    pub slots: Arc<SlotTracker>,
    pub counters: Arc<PoolCounters>,
    pub poll_interval: Duration,
    pub stale_lease_threshold: Option<Duration>,
    pub reclaim_interval: Duration,
    pub shutdown: CancellationToken,
}

impl Dispatcher {
    /// Run until shutdown, then wait for every started job
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        let active = Arc::new(ActiveJobs::default());
        let mut idle_until: Option<Instant> = None;
        let mut next_reclaim = self.stale_lease_threshold.map(|_| Instant::now());

        loop {
            if let Some(at) = next_reclaim {
                if at <= Instant::now() {
                    if self.reclaim_stale_leases(&active).await {
                        idle_until = None;
                    }
                    next_reclaim = Some(Instant::now() + self.reclaim_interval);
                }
            }

            if idle_until.is_none() {
                match self.fill_slots(&mut tasks, &active).await {
                    Fill::Full => {}
                    Fill::Empty | Fill::ClaimFailed => {
                        idle_until = Some(Instant::now() + self.poll_interval);
                    }
                    Fill::Stopped => break,
                }
            }

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_task_exit(joined);
                    // Refill the freed slot right away
                    idle_until = None;
                }

                _ = sleep_until(idle_until.unwrap_or_else(Instant::now)),
                    if idle_until.is_some() =>
                {
                    idle_until = None;
                }

                // Reclaim runs at the top of the loop once this fires
                _ = sleep_until(next_reclaim.unwrap_or_else(Instant::now)),
                    if next_reclaim.is_some() => {}
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Claiming stopped, waiting for in-flight jobs");
        }
        while let Some(joined) = tasks.join_next().await {
            log_task_exit(joined);
        }
        debug!("Claim loop exited");
    }

    /// Claim until every slot is occupied or no job is available
    async fn fill_slots(&self, tasks: &mut JoinSet<()>, active: &Arc<ActiveJobs>) -> Fill {
        while self.slots.available() > 0 {
            if self.shutdown.is_cancelled() {
                return Fill::Stopped;
            }

            self.counters.claim_attempts.fetch_add(1, Ordering::Relaxed);
            let job = match self.queue.claim_next_job().await {
                Ok(Some(job)) => job,
                Ok(None) => return Fill::Empty,
                Err(e) => {
                    error!(error = %e, "Failed to claim job");
                    return Fill::ClaimFailed;
                }
            };

            // A claim in flight when stop() was called must not start a job
            if self.shutdown.is_cancelled() {
                self.release(&job).await;
                return Fill::Stopped;
            }

            let Some(slot) = self.slots.try_occupy() else {
                error!(job_id = %job.id, "Claimed a job without a free slot");
                self.release(&job).await;
                return Fill::ClaimFailed;
            };

            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                consecutive_failures = job.consecutive_failures,
                "Claimed job"
            );
            self.counters.jobs_started.fetch_add(1, Ordering::Relaxed);
            let tracked = active.track(job.id);
            tasks.spawn(run_job(
                Arc::clone(&self.queue),
                Arc::clone(&self.handler),
                Arc::clone(&self.counters),
                job,
                slot,
                tracked,
            ));
        }

        Fill::Full
    }

    async fn release(&self, job: &Job) {
        if let Err(e) = self.queue.release_job(job.id).await {
            error!(job_id = %job.id, error = %e, "Failed to release claimed job");
        }
    }

    /// Returns true when any lease was reclaimed
    async fn reclaim_stale_leases(&self, active: &ActiveJobs) -> bool {
        let Some(threshold) = self.stale_lease_threshold else {
            return false;
        };

        let active = active.snapshot();
        match self.queue.reclaim_stale_leases(threshold, &active).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                warn!(count = reclaimed.len(), ?reclaimed, "Reclaimed stale job leases");
                true
            }
            Ok(_) => false,
            Err(e) => {
                error!(error = %e, "Stale lease reclamation failed");
                false
            }
        }
    }
}

/// Execute one job and report its outcome
///
/// The slot and the active entry are held until the outcome has been written
/// back.
async fn run_job(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    counters: Arc<PoolCounters>,
    job: Job,
    slot: SlotGuard,
    active: ActiveJob,
) {
    let job_id = job.id;
    let job_type = job.job_type.clone();
    let started = Instant::now();

    let result = AssertUnwindSafe(handler.process(job))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));
    let elapsed = started.elapsed();

    let outcome = match &result {
        Ok(()) => {
            counters.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
            JobOutcome::Succeeded
        }
        Err(e) => {
            counters.jobs_failed.fetch_add(1, Ordering::Relaxed);
            JobOutcome::failed(e.to_string())
        }
    };

    match queue.complete_job(job_id, &outcome).await {
        Ok(record) => match &result {
            Ok(()) => info!(%job_id, %job_type, ?elapsed, "Job completed"),
            Err(e) => warn!(
                %job_id,
                %job_type,
                ?elapsed,
                error = %e,
                consecutive_failures = record.consecutive_failures,
                next_run_at = %record.next_run_at,
                enabled = record.enabled,
                "Job failed"
            ),
        },
        Err(e) => error!(%job_id, %job_type, error = %e, "Failed to record job outcome"),
    }

    drop(active);
    drop(slot);
}

fn log_task_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Job task panicked outside its handler");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
