// Feed pipeline jobs
// Decision: One handler for every feed job type, payloads decoded as a tagged enum

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use feedloop_jobs::{Job, JobError, JobHandler, NewJob, TypedJob};

/// Jobs processed by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FeedJob {
    /// Fetch new entries for one feed
    FetchFeed { feed_id: i64 },
    /// Retrain one user's relevance model
    TrainModel { user_id: i64 },
    /// Score unread entries for one user
    PredictScores { user_id: i64 },
    /// Fetch a feed that kept failing, on operator request
    RetryBrokenFeed { feed_id: i64 },
}

impl TypedJob for FeedJob {}

impl FeedJob {
    pub const ALL_TYPES: [&'static str; 4] = [
        "fetch_feed",
        "train_model",
        "predict_scores",
        "retry_broken_feed",
    ];

    pub fn job_type(&self) -> &'static str {
        match self {
            Self::FetchFeed { .. } => "fetch_feed",
            Self::TrainModel { .. } => "train_model",
            Self::PredictScores { .. } => "predict_scores",
            Self::RetryBrokenFeed { .. } => "retry_broken_feed",
        }
    }

    /// Build a queue definition for this job
    pub fn to_new_job(&self) -> NewJob {
        let payload = match self {
            Self::FetchFeed { feed_id } | Self::RetryBrokenFeed { feed_id } => {
                serde_json::json!({ "feed_id": feed_id })
            }
            Self::TrainModel { user_id } | Self::PredictScores { user_id } => {
                serde_json::json!({ "user_id": user_id })
            }
        };
        NewJob::new(self.job_type(), payload)
    }
}

/// How often each job type runs again after succeeding
pub fn schedules() -> [(&'static str, Duration); 3] {
    [
        ("fetch_feed", Duration::from_secs(15 * 60)),
        ("train_model", Duration::from_secs(6 * 3600)),
        ("predict_scores", Duration::from_secs(3600)),
    ]
}

/// Result of fetching one feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub new_entries: usize,
}

/// The work behind each job type
#[async_trait]
pub trait FeedServices: Send + Sync + 'static {
    async fn fetch_feed(&self, feed_id: i64) -> Result<FetchSummary>;
    async fn train_model(&self, user_id: i64) -> Result<()>;
    /// Returns the number of entries scored
    async fn predict_scores(&self, user_id: i64) -> Result<usize>;
}

/// Processes every [`FeedJob`] through a [`FeedServices`]
pub struct FeedJobHandler<S> {
    services: Arc<S>,
}

impl<S: FeedServices> FeedJobHandler<S> {
    pub fn new(services: Arc<S>) -> Self {
        Self { services }
    }

    async fn run(&self, job: FeedJob) -> Result<()> {
        match job {
            FeedJob::FetchFeed { feed_id } => {
                let summary = self.services.fetch_feed(feed_id).await?;
                info!(feed_id, new_entries = summary.new_entries, "Fetched feed");
            }
            FeedJob::TrainModel { user_id } => {
                self.services.train_model(user_id).await?;
                info!(user_id, "Trained model");
            }
            FeedJob::PredictScores { user_id } => {
                let scored = self.services.predict_scores(user_id).await?;
                info!(user_id, scored, "Predicted scores");
            }
            FeedJob::RetryBrokenFeed { feed_id } => {
                warn!(feed_id, "Retrying broken feed");
                let summary = self.services.fetch_feed(feed_id).await?;
                info!(
                    feed_id,
                    new_entries = summary.new_entries,
                    "Broken feed recovered"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: FeedServices> JobHandler for FeedJobHandler<S> {
    async fn process(&self, job: Job) -> Result<(), JobError> {
        let feed_job = FeedJob::decode(&job)?;
        debug!(job_id = %job.id, ?feed_job, "Processing feed job");
        self.run(feed_job)
            .await
            .map_err(|e| JobError::failed(format!("{e:#}")))
    }
}

/// Services that only log and wait, for running the worker without backends
#[derive(Debug, Clone)]
pub struct SimulatedFeedServices {
    latency: Duration,
}

impl SimulatedFeedServices {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl FeedServices for SimulatedFeedServices {
    async fn fetch_feed(&self, feed_id: i64) -> Result<FetchSummary> {
        tokio::time::sleep(self.latency).await;
        debug!(feed_id, "Simulated feed fetch");
        Ok(FetchSummary::default())
    }

    async fn train_model(&self, user_id: i64) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        debug!(user_id, "Simulated model training");
        Ok(())
    }

    async fn predict_scores(&self, user_id: i64) -> Result<usize> {
        tokio::time::sleep(self.latency).await;
        debug!(user_id, "Simulated scoring");
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingServices {
        calls: Mutex<Vec<String>>,
        broken_feeds: Vec<i64>,
    }

    #[async_trait]
    impl FeedServices for RecordingServices {
        async fn fetch_feed(&self, feed_id: i64) -> Result<FetchSummary> {
            self.calls.lock().unwrap().push(format!("fetch:{feed_id}"));
            if self.broken_feeds.contains(&feed_id) {
                return Err(anyhow!("HTTP 404").context(format!("fetching feed {feed_id}")));
            }
            Ok(FetchSummary { new_entries: 3 })
        }

        async fn train_model(&self, user_id: i64) -> Result<()> {
            self.calls.lock().unwrap().push(format!("train:{user_id}"));
            Ok(())
        }

        async fn predict_scores(&self, user_id: i64) -> Result<usize> {
            self.calls.lock().unwrap().push(format!("predict:{user_id}"));
            Ok(12)
        }
    }

    fn job(feed_job: &FeedJob) -> Job {
        Job::from_definition(feed_job.to_new_job(), Utc::now())
    }

    #[test]
    fn test_new_job_round_trips_through_decode() {
        for feed_job in [
            FeedJob::FetchFeed { feed_id: 1 },
            FeedJob::TrainModel { user_id: 2 },
            FeedJob::PredictScores { user_id: 3 },
            FeedJob::RetryBrokenFeed { feed_id: 4 },
        ] {
            let job = job(&feed_job);
            assert!(FeedJob::ALL_TYPES.contains(&job.job_type.as_str()));
            assert_eq!(FeedJob::decode(&job).unwrap(), feed_job);
        }
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        let job = Job::from_definition(
            NewJob::new("fetch_feed", json!({ "feed": "nope" })),
            Utc::now(),
        );
        assert!(matches!(
            FeedJob::decode(&job),
            Err(JobError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_dispatches_each_type() {
        let services = Arc::new(RecordingServices::default());
        let handler = FeedJobHandler::new(services.clone());

        for feed_job in [
            FeedJob::FetchFeed { feed_id: 1 },
            FeedJob::TrainModel { user_id: 2 },
            FeedJob::PredictScores { user_id: 2 },
            FeedJob::RetryBrokenFeed { feed_id: 5 },
        ] {
            handler.process(job(&feed_job)).await.unwrap();
        }

        assert_eq!(
            *services.calls.lock().unwrap(),
            vec!["fetch:1", "train:2", "predict:2", "fetch:5"]
        );
    }

    #[tokio::test]
    async fn test_service_error_keeps_context() {
        let services = Arc::new(RecordingServices {
            broken_feeds: vec![9],
            ..Default::default()
        });
        let handler = FeedJobHandler::new(services);

        let err = handler
            .process(job(&FeedJob::FetchFeed { feed_id: 9 }))
            .await
            .unwrap_err();
        assert_eq!(err, JobError::failed("fetching feed 9: HTTP 404"));
    }
}
