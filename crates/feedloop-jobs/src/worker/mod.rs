//! Worker pool for job execution
//!
//! This module provides:
//! - [`WorkerPool`] - Bounded pool with claim-and-refill and graceful drain
//! - [`WorkerPoolConfig`] - Concurrency, poll interval and lease reclamation
//! - [`SlotTracker`] - Atomic slot accounting shared with job tasks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         WorkerPool                            │
//! │   start() / stop() / stats()      status: watch channel       │
//! │         │                                                      │
//! │         ▼                                                      │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │          Claim loop (one task, CancellationToken)        │  │
//! │  │  fill free slots ─► empty? sleep poll_interval           │  │
//! │  │        ▲                    │                            │  │
//! │  │        └── join_next ◄──────┘   stale lease reclaimer    │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │         │                                                      │
//! │         ▼                                                      │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │        Job tasks (JoinSet, SlotTracker-limited)          │  │
//! │  │  [Job 1] [Job 2] ... [Job N]  ─► JobQueue::complete_job  │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use feedloop_jobs::{BackoffPolicy, InMemoryJobQueue, JobRouter};
//! use feedloop_jobs::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let queue = Arc::new(InMemoryJobQueue::new(BackoffPolicy::exponential()));
//! let router = JobRouter::new().route("fetch_feed", |job| async move {
//!     // Fetch the feed...
//!     Ok(())
//! });
//!
//! let config = WorkerPoolConfig::new(4, Duration::from_secs(1));
//! let pool = WorkerPool::new(queue, Arc::new(router), config)?;
//!
//! pool.start().await;
//!
//! // Graceful shutdown
//! pool.stop().await;
//! ```

mod config;
mod dispatch;
mod pool;
mod slots;

pub use config::WorkerPoolConfig;
pub use pool::{PoolStats, WorkerPool, WorkerPoolError, WorkerPoolStatus};
pub use slots::{SlotGuard, SlotTracker};
