//! Worker pool lifecycle
//!
//! The pool owns the slot tracker and counters for its whole life. Each
//! `start()` spawns a fresh claim loop with its own shutdown token, so a pool
//! can be stopped and started again. The claim loop task publishes `Stopped`
//! itself once its drain is over, whether or not anyone is still awaiting
//! `stop()`.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::config::WorkerPoolConfig;
use super::dispatch::{Dispatcher, PoolCounters};
use super::slots::SlotTracker;
use crate::job::JobHandler;
use crate::queue::JobQueue;

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolStatus {
    /// Claim loop is running
    Running,
    /// No new claims, waiting for in-flight jobs
    Draining,
    /// No claim loop and no jobs in flight
    Stopped,
}

impl fmt::Display for WorkerPoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// True from `start()` until the drain after `stop()` has finished
    pub running: bool,
    pub status: WorkerPoolStatus,
    /// Jobs currently holding a slot, never above `concurrency`
    pub active_jobs: usize,
    pub concurrency: usize,
    pub claim_attempts: u64,
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

struct RunHandle {
    shutdown: CancellationToken,
    coordinator: JoinHandle<()>,
}

/// Bounded pool that keeps up to `concurrency` jobs running
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerPoolConfig,
    slots: Arc<SlotTracker>,
    counters: Arc<PoolCounters>,
    status: Arc<watch::Sender<WorkerPoolStatus>>,
    run: Mutex<Option<RunHandle>>,
}

impl WorkerPool {
    /// Create a stopped pool
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
    ) -> Result<Self, WorkerPoolError> {
        config.validate()?;

        let (status, _) = watch::channel(WorkerPoolStatus::Stopped);
        Ok(Self {
            queue,
            handler,
            slots: Arc::new(SlotTracker::new(config.concurrency)),
            counters: Arc::new(PoolCounters::default()),
            config,
            status: Arc::new(status),
            run: Mutex::new(None),
        })
    }

    /// Start the claim loop
    ///
    /// Starting a pool that is running or still draining only logs a warning.
    #[instrument(skip(self), fields(concurrency = self.config.concurrency))]
    pub async fn start(&self) {
        let mut run = self.run.lock().await;

        let status = *self.status.borrow();
        if status != WorkerPoolStatus::Stopped {
            warn!(%status, "Worker pool already started, ignoring start");
            return;
        }

        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            slots: Arc::clone(&self.slots),
            counters: Arc::clone(&self.counters),
            poll_interval: self.config.poll_interval,
            stale_lease_threshold: self.config.stale_lease_threshold,
            reclaim_interval: self.config.reclaim_interval,
            shutdown: shutdown.clone(),
        };

        let status = Arc::clone(&self.status);
        let coordinator = tokio::spawn(async move {
            let result = AssertUnwindSafe(dispatcher.run()).catch_unwind().await;
            status.send_replace(WorkerPoolStatus::Stopped);
            if let Err(panic) = result {
                std::panic::resume_unwind(panic);
            }
        });
        *run = Some(RunHandle {
            shutdown,
            coordinator,
        });
        self.status.send_replace(WorkerPoolStatus::Running);

        info!(
            poll_interval = ?self.config.poll_interval,
            stale_lease_threshold = ?self.config.stale_lease_threshold,
            "Worker pool started"
        );
    }

    /// Stop claiming and wait for every in-flight job
    ///
    /// A second caller during the drain waits for the same drain. Stopping a
    /// stopped pool only logs a warning. Dropping the returned future does not
    /// interrupt the drain; the pool still reaches `Stopped` on its own.
    #[instrument(skip(self), fields(concurrency = self.config.concurrency))]
    pub async fn stop(&self) {
        let handle = {
            let mut run = self.run.lock().await;
            let status = *self.status.borrow();
            match status {
                WorkerPoolStatus::Stopped => {
                    warn!("Worker pool is not running, ignoring stop");
                    return;
                }
                WorkerPoolStatus::Draining => None,
                WorkerPoolStatus::Running => {
                    self.status.send_replace(WorkerPoolStatus::Draining);
                    let handle = run.take();
                    if let Some(handle) = &handle {
                        handle.shutdown.cancel();
                    }
                    handle
                }
            }
        };

        let Some(handle) = handle else {
            debug!("Worker pool already draining, waiting for it to stop");
            let mut status = self.status.subscribe();
            // The sender lives in self, so this only returns once stopped
            let _ = status
                .wait_for(|status| *status == WorkerPoolStatus::Stopped)
                .await;
            return;
        };

        info!(
            active_jobs = self.slots.occupied(),
            "Stopping worker pool, draining in-flight jobs"
        );

        match handle.coordinator.await {
            Ok(()) => info!(
                jobs_started = self.counters.jobs_started.load(Ordering::Relaxed),
                "Worker pool stopped"
            ),
            Err(e) if e.is_panic() => {
                error!("Claim loop panicked");
                std::panic::resume_unwind(e.into_panic());
            }
            Err(e) => {
                error!(error = %e, "Claim loop was cancelled");
                // An aborted loop never published its own status
                self.status.send_if_modified(|status| {
                    let draining = *status == WorkerPoolStatus::Draining;
                    if draining {
                        *status = WorkerPoolStatus::Stopped;
                    }
                    draining
                });
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let status = self.status();
        PoolStats {
            running: status != WorkerPoolStatus::Stopped,
            status,
            active_jobs: self.slots.occupied(),
            concurrency: self.slots.capacity(),
            claim_attempts: self.counters.claim_attempts.load(Ordering::Relaxed),
            jobs_started: self.counters.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: self.counters.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.counters.jobs_failed.load(Ordering::Relaxed),
        }
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<WorkerPoolStatus> {
        self.status.subscribe()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("active_jobs", &self.slots.occupied())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropped without stop(): stop claiming, running jobs finish detached
        if let Some(run) = self.run.get_mut().take() {
            run.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::{Job, JobError};
    use crate::queue::InMemoryJobQueue;
    use crate::reliability::BackoffPolicy;

    fn pool(config: WorkerPoolConfig) -> Result<WorkerPool, WorkerPoolError> {
        let queue = Arc::new(InMemoryJobQueue::new(BackoffPolicy::exponential()));
        let handler = Arc::new(|_job: Job| async { Ok::<(), JobError>(()) });
        WorkerPool::new(queue, handler, config)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = pool(WorkerPoolConfig::default().with_concurrency(0)).unwrap_err();
        assert!(matches!(err, WorkerPoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_new_pool_is_stopped() {
        let pool = pool(WorkerPoolConfig::new(3, Duration::from_millis(50))).unwrap();
        let stats = pool.stats();
        assert!(!stats.running);
        assert_eq!(stats.status, WorkerPoolStatus::Stopped);
        assert_eq!(stats.active_jobs, 0);
        assert_eq!(stats.concurrency, 3);
        assert_eq!(stats.claim_attempts, 0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(WorkerPoolStatus::Running.to_string(), "running");
        assert_eq!(WorkerPoolStatus::Draining.to_string(), "draining");
        assert_eq!(WorkerPoolStatus::Stopped.to_string(), "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_stopped_is_noop() {
        let pool = pool(WorkerPoolConfig::default()).unwrap();
        pool.stop().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_restart() {
        let pool = pool(WorkerPoolConfig::new(2, Duration::from_millis(50))).unwrap();

        pool.start().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Running);
        assert!(pool.stats().running);

        pool.stop().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);

        pool.start().await;
        assert_eq!(pool.status(), WorkerPoolStatus::Running);
        pool.stop().await;
        assert!(!pool.stats().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_published() {
        let pool = pool(WorkerPoolConfig::default()).unwrap();
        let mut status = pool.subscribe();

        pool.start().await;
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), WorkerPoolStatus::Running);

        pool.stop().await;
        assert_eq!(*status.borrow_and_update(), WorkerPoolStatus::Stopped);
    }
}
