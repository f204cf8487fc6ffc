//! Job handler trait and per-type routing

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::record::Job;

/// Errors a handler reports for a single job
///
/// Every variant is recorded as a failure on the job record; none of them
/// affect the worker pool itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The handler ran and failed
    #[error("{0}")]
    Failed(String),

    /// The payload could not be decoded for the job type
    #[error("invalid payload for job type {job_type}: {message}")]
    InvalidPayload { job_type: String, message: String },

    /// No handler registered for the job type
    #[error("no handler registered for job type: {0}")]
    UnknownType(String),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Executes claimed jobs
///
/// Implemented for any `Fn(Job) -> impl Future<Output = Result<(), JobError>>`
/// so closures can be passed directly.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn process(&self, job: Job) -> Result<(), JobError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn process(&self, job: Job) -> Result<(), JobError> {
        (self)(job).await
    }
}

/// A tagged enum decoded from a job's type and payload
///
/// Implementors must be adjacently tagged with `type` and `payload`:
///
/// ```
/// use feedloop_jobs::TypedJob;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// #[serde(tag = "type", content = "payload", rename_all = "snake_case")]
/// enum FeedJob {
///     FetchFeed { feed_id: i64 },
///     TrainModel { user_id: i64 },
/// }
///
/// impl TypedJob for FeedJob {}
/// ```
pub trait TypedJob: DeserializeOwned + Sized {
    fn decode(job: &Job) -> Result<Self, JobError> {
        let tagged = serde_json::json!({
            "type": job.job_type,
            "payload": job.payload,
        });
        serde_json::from_value(tagged).map_err(|e| JobError::InvalidPayload {
            job_type: job.job_type.clone(),
            message: e.to_string(),
        })
    }
}

/// Dispatches jobs to handlers by `job_type`
#[derive(Clone, Default)]
pub struct JobRouter {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job type, replacing any previous one
    pub fn route(mut self, job_type: impl Into<String>, handler: impl JobHandler) -> Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn handles(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }
}

impl std::fmt::Debug for JobRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRouter")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[async_trait]
impl JobHandler for JobRouter {
    async fn process(&self, job: Job) -> Result<(), JobError> {
        let handler = self
            .handlers
            .get(&job.job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownType(job.job_type.clone()))?;
        handler.process(job).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::job::NewJob;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(tag = "type", content = "payload", rename_all = "snake_case")]
    enum SampleJob {
        FetchFeed { feed_id: i64 },
        TrainModel { user_id: i64 },
    }

    impl TypedJob for SampleJob {}

    fn job(job_type: &str, payload: serde_json::Value) -> Job {
        Job::from_definition(NewJob::new(job_type, payload), Utc::now())
    }

    #[test]
    fn test_typed_decode() {
        let decoded = SampleJob::decode(&job("fetch_feed", json!({"feed_id": 7}))).unwrap();
        assert_eq!(decoded, SampleJob::FetchFeed { feed_id: 7 });

        let decoded = SampleJob::decode(&job("train_model", json!({"user_id": 3}))).unwrap();
        assert_eq!(decoded, SampleJob::TrainModel { user_id: 3 });
    }

    #[test]
    fn test_typed_decode_rejects_bad_payload() {
        let err = SampleJob::decode(&job("fetch_feed", json!({"feed": "x"}))).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidPayload { ref job_type, .. } if job_type == "fetch_feed"
        ));

        let err = SampleJob::decode(&job("send_email", json!({}))).unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn test_router_dispatches_by_type() {
        let router = JobRouter::new()
            .route("ok", |_job: Job| async { Ok::<(), JobError>(()) })
            .route("boom", |job: Job| async move {
                Err::<(), JobError>(JobError::failed(format!("failed {}", job.job_type)))
            });

        assert_eq!(router.job_types(), vec!["boom", "ok"]);
        assert!(router.handles("ok"));

        assert_eq!(router.process(job("ok", json!(null))).await, Ok(()));
        assert_eq!(
            router.process(job("boom", json!(null))).await,
            Err(JobError::Failed("failed boom".to_string()))
        );
    }

    #[tokio::test]
    async fn test_router_unknown_type() {
        let router = JobRouter::new();
        let err = router.process(job("missing", json!(null))).await.unwrap_err();
        assert_eq!(err, JobError::UnknownType("missing".to_string()));
        assert_eq!(err.to_string(), "no handler registered for job type: missing");
    }
}
