//! # Feedloop Jobs
//!
//! Background job execution for the feed pipeline: fetching feeds, training
//! per-user models and scoring entries.
//!
//! ## Features
//!
//! - **Bounded concurrency**: never more than `concurrency` jobs in flight
//! - **Immediate refill**: a finished job's slot is claimed again right away
//! - **Poll backoff**: an empty queue is polled once per `poll_interval`
//! - **Graceful drain**: `stop()` stops claiming and waits for running jobs
//! - **Failure backoff**: failing jobs are pushed out exponentially and can be
//!   auto-disabled
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (claims jobs into free slots, drains on stop)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ claim / complete / release
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         JobQueue                             │
//! │  (leases, failure streaks, BackoffPolicy rescheduling)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ process(job)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  JobHandler / JobRouter                      │
//! │  (decodes payloads into a TypedJob, runs the work)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use feedloop_jobs::prelude::*;
//!
//! let queue = Arc::new(InMemoryJobQueue::new(BackoffPolicy::exponential()));
//! queue.enqueue(NewJob::new("fetch_feed", json!({"feed_id": 7})));
//!
//! let router = JobRouter::new().route("fetch_feed", |job: Job| async move {
//!     let FeedJob::FetchFeed { feed_id } = FeedJob::decode(&job)?;
//!     fetch(feed_id).await.map_err(JobError::failed)
//! });
//!
//! let pool = WorkerPool::new(queue, Arc::new(router), WorkerPoolConfig::default())?;
//! pool.start().await;
//! // ...
//! pool.stop().await;
//! ```

mod duration_millis;

pub mod job;
pub mod queue;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::job::{Job, JobError, JobHandler, JobOutcome, JobRouter, NewJob, TypedJob};
    pub use crate::queue::{InMemoryJobQueue, JobQueue, QueueError};
    pub use crate::reliability::BackoffPolicy;
    pub use crate::worker::{
        PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus,
    };
}

// Re-export key types at crate root
pub use job::{Job, JobError, JobHandler, JobOutcome, JobRouter, NewJob, TypedJob};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError};
pub use reliability::BackoffPolicy;
pub use worker::{PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
