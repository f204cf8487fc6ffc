mod config;
mod jobs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use feedloop_jobs::{InMemoryJobQueue, WorkerPool};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::WorkerConfig;
use crate::jobs::{schedules, FeedJob, FeedJobHandler, SimulatedFeedServices};

const DEFAULT_LOG_FILTER: &str = "feedloop_worker=debug,feedloop_jobs=debug";

/// Streak at which a job is reported as broken
const BROKEN_JOB_THRESHOLD: u32 = 3;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

const SIMULATED_LATENCY: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG: Full log filter
    // - LOG_LEVEL: Level for the worker crates (default: "debug")
    let log_filter = std::env::var("RUST_LOG").ok().or_else(|| {
        std::env::var("LOG_LEVEL")
            .ok()
            .map(|level| format!("feedloop_worker={level},feedloop_jobs={level}"))
    });
    tracing_subscriber::registry()
        .with(
            log_filter
                .and_then(|filter| EnvFilter::try_new(filter).ok())
                .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("feedloop-worker starting...");

    let config = WorkerConfig::from_env().context("Failed to load worker configuration")?;
    info!(
        concurrency = config.pool.concurrency,
        poll_interval = ?config.pool.poll_interval,
        stale_lease_threshold = ?config.pool.stale_lease_threshold,
        disable_after = ?config.backoff.disable_after,
        job_types = ?FeedJob::ALL_TYPES,
        "Loaded worker configuration"
    );

    let queue = schedules()
        .into_iter()
        .fold(
            InMemoryJobQueue::new(config.backoff.clone()),
            |queue, (job_type, interval)| queue.with_schedule(job_type, interval),
        );
    let queue = Arc::new(queue);
    let seeded = seed(&queue, &config);
    info!(seeded, "Seeded job queue");

    let handler = FeedJobHandler::new(Arc::new(SimulatedFeedServices::new(SIMULATED_LATENCY)));
    let pool = WorkerPool::new(queue.clone(), Arc::new(handler), config.pool.clone())
        .context("Failed to create worker pool")?;

    pool.start().await;

    let mut report = tokio::time::interval(STATS_INTERVAL);
    report.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Received shutdown signal");
                break;
            }
            _ = report.tick() => report_stats(&pool, &queue),
        }
    }

    pool.stop().await;
    report_stats(&pool, &queue);

    info!("Worker shutdown complete");
    Ok(())
}

/// Enqueue the configured feeds and users
fn seed(queue: &InMemoryJobQueue, config: &WorkerConfig) -> usize {
    let feeds = config
        .seed_feeds
        .iter()
        .map(|&feed_id| FeedJob::FetchFeed { feed_id });
    let users = config.seed_users.iter().flat_map(|&user_id| {
        [
            FeedJob::TrainModel { user_id },
            FeedJob::PredictScores { user_id },
        ]
    });

    feeds
        .chain(users)
        .map(|job| queue.enqueue(job.to_new_job()))
        .count()
}

fn report_stats(pool: &WorkerPool, queue: &InMemoryJobQueue) {
    let stats = pool.stats();
    info!(
        status = %stats.status,
        active_jobs = stats.active_jobs,
        concurrency = stats.concurrency,
        jobs_succeeded = stats.jobs_succeeded,
        jobs_failed = stats.jobs_failed,
        queued = queue.len(),
        "Worker pool stats"
    );

    for job in queue.broken_jobs(BROKEN_JOB_THRESHOLD) {
        warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            consecutive_failures = job.consecutive_failures,
            enabled = job.enabled,
            last_error = job.last_error.as_deref().unwrap_or_default(),
            "Job keeps failing"
        );
    }
}

#[cfg(test)]
mod tests {
    use feedloop_jobs::BackoffPolicy;

    use super::*;

    #[test]
    fn test_seed_enqueues_feeds_and_users() {
        let queue = InMemoryJobQueue::new(BackoffPolicy::exponential());
        let config = WorkerConfig {
            seed_feeds: vec![1, 2],
            seed_users: vec![7],
            ..Default::default()
        };

        assert_eq!(seed(&queue, &config), 4);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.eligible_count(), 4);
    }
}
