//! Worker runtime for serverless job handlers.
//!
//! A worker polls the job API for the next job, hands the job payload to
//! the registered [`Handler`], and posts the handler's result back. Workers
//! started with a test input run the handler once locally instead.

use reqwest::StatusCode;
use std::{
    future::Future,
    path::{Path, PathBuf},
};
use tokio::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{debug, error, info, warn};

mod client;
mod config;
mod error;
mod handler;
mod job;

use client::JobClient;
pub use config::{ENV_PREFIX, EnvString, WorkerConfig};
pub use error::WorkerError;
pub use handler::{BoxError, Handler};
pub use job::{Job, JobPayload, JobResult};

/// File read as test input when it exists in the working directory.
pub const TEST_INPUT_FILE: &str = "test_input.json";

/// Register `handler` and run the worker with configuration from the
/// environment until the process receives a shutdown signal.
pub async fn start<H>(handler: H) -> Result<(), WorkerError>
where
    H: Handler + 'static,
{
    start_with(WorkerConfig::load()?, handler).await
}

/// Like [`start`], with a configuration that was already loaded. The
/// test input falls back to [`TEST_INPUT_FILE`] when none is set.
pub async fn start_with<H>(mut config: WorkerConfig, handler: H) -> Result<(), WorkerError>
where
    H: Handler + 'static,
{
    if config.test_input.is_none() {
        config.test_input = read_test_input_file(Path::new(TEST_INPUT_FILE))?;
    }

    run(config, handler).await
}

/// Run the worker with an explicit configuration.
pub async fn run<H>(config: WorkerConfig, handler: H) -> Result<(), WorkerError>
where
    H: Handler + 'static,
{
    if let Some(input) = &config.test_input {
        let result = run_test_input(&handler, input).await?;
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    let worker = Worker::new(config, handler)?;

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("serverless worker", move |s| {
            start_worker(s, worker)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(1000))
    .await
    .map_err(|e| WorkerError::Shutdown(e.to_string()))
}

async fn start_worker<H: Handler>(
    subsys: SubsystemHandle,
    worker: Worker<H>,
) -> Result<(), WorkerError> {
    let processed = worker.run_until(subsys.on_shutdown_requested()).await;
    info!(processed, "terminating serverless worker");

    subsys.request_shutdown();
    Ok(())
}

/// Run the handler once on a local payload, without contacting the job API.
pub async fn run_test_input<H: Handler>(handler: &H, input: &str) -> Result<JobResult, WorkerError> {
    let mut job = Job::from_slice(input.as_bytes())?;
    if job.id.is_none() {
        job.payload
            .insert("id".into(), job::LOCAL_TEST_JOB_ID.into());
    }

    info!(input = %input, "running handler with local test input");
    Ok(handler::invoke(handler, job.payload).await)
}

fn read_test_input_file(path: &Path) -> Result<Option<String>, WorkerError> {
    if !path.is_file() {
        return Ok(None);
    }

    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|e| WorkerError::ReadTestInput(PathBuf::from(path), e))
}

/// Job polling loop for one handler.
pub struct Worker<H> {
    client: JobClient,
    handler: H,
    poll_interval: Duration,
    max_jobs: Option<usize>,
}

impl<H: Handler> Worker<H> {
    pub fn new(config: WorkerConfig, handler: H) -> Result<Worker<H>, WorkerError> {
        let poll_interval = config.poll_interval();
        let max_jobs = config.max_jobs;
        let client = JobClient::new(config)?;

        Ok(Worker {
            client,
            handler,
            poll_interval,
            max_jobs,
        })
    }

    /// Process jobs until `shutdown` resolves or `max_jobs` jobs have been
    /// handled. A job already taken is always finished and posted before
    /// the loop stops. Returns the number of jobs processed.
    pub async fn run_until<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut processed = 0;

        loop {
            if self.max_jobs.is_some_and(|max| processed >= max) {
                return processed;
            }

            let next = tokio::select! {
                _ = &mut shutdown => return processed,
                next = self.client.next_job() => next,
            };

            match next {
                Ok(Some(job)) => {
                    if self.process(job).await {
                        processed += 1;
                    }
                    continue;
                }
                Ok(None) => debug!("no jobs in queue"),
                Err(error) => warn!(%error, "failed to get the next job"),
            }

            tokio::select! {
                _ = &mut shutdown => return processed,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn process(&self, job: Job) -> bool {
        let Some(job_id) = job.id.clone() else {
            warn!(job = ?job.payload, "skipping job without an id");
            return false;
        };

        info!(job_id, "job started");
        let result = handler::invoke(&self.handler, job.payload).await;
        if let JobResult::Error(error) = &result {
            error!(job_id, %error, "job handler failed");
        }

        match self.client.post_result(&job_id, &result).await {
            Ok(()) => info!(job_id, "job completed"),
            Err(error) if is_recorded_error(&result, &error) => {
                debug!(job_id, %error, "job error recorded")
            }
            Err(error) => warn!(job_id, %error, "failed to post the job result"),
        }

        true
    }
}

/// Job APIs answer `400 Bad Request` once they have recorded an error result.
fn is_recorded_error(result: &JobResult, error: &WorkerError) -> bool {
    result.is_error()
        && matches!(
            error,
            WorkerError::UnexpectedStatus { status, .. } if *status == StatusCode::BAD_REQUEST
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn echo(job: JobPayload) -> impl Future<Output = Result<Value, BoxError>> + Send {
        async move { Ok(job.get("input").cloned().unwrap_or_else(|| json!({}))) }
    }

    #[tokio::test]
    async fn test_run_test_input() {
        let result = run_test_input(&echo, r#"{"input": {"prompt": "hi"}}"#)
            .await
            .unwrap();
        assert_eq!(JobResult::Output(json!({"prompt": "hi"})), result);
    }

    #[tokio::test]
    async fn test_test_input_gets_a_job_id() {
        let handler = |job: JobPayload| async move {
            Ok::<_, BoxError>(job.get("id").cloned().unwrap_or(Value::Null))
        };

        let result = run_test_input(&handler, "{}").await.unwrap();
        assert_eq!(JobResult::Output(json!("local_test")), result);

        let result = run_test_input(&handler, r#"{"id": "mine"}"#).await.unwrap();
        assert_eq!(JobResult::Output(json!("mine")), result);
    }

    #[tokio::test]
    async fn test_invalid_test_input() {
        let err = run_test_input(&echo, "[]").await.unwrap_err();
        assert!(matches!(err, WorkerError::JobNotAnObject));
    }

    #[test]
    fn test_missing_test_input_file() {
        let path = std::env::temp_dir().join("sls-worker-missing-test-input.json");
        assert_eq!(None, read_test_input_file(&path).unwrap());
    }

    #[test]
    fn test_read_test_input_file() {
        let path = std::env::temp_dir().join("sls-worker-test-input.json");
        std::fs::write(&path, r#"{"input": {"a": 1}}"#).unwrap();

        let input = read_test_input_file(&path).unwrap();
        assert_eq!(Some(r#"{"input": {"a": 1}}"#.to_string()), input);
    }

    #[test]
    fn test_worker_requires_webhooks() {
        let err = Worker::new(WorkerConfig::default(), echo).err().unwrap();
        assert!(matches!(err, WorkerError::MissingSetting { .. }));
    }

    #[test]
    fn test_bad_request_records_error_results() {
        let rejected = WorkerError::UnexpectedStatus {
            status: StatusCode::BAD_REQUEST,
            url: "http://localhost/job-done".into(),
        };
        let unavailable = WorkerError::UnexpectedStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            url: "http://localhost/job-done".into(),
        };
        let failed = JobResult::Error("model crashed".into());
        let output = JobResult::Output(json!({}));

        assert!(is_recorded_error(&failed, &rejected));
        assert!(!is_recorded_error(&failed, &unavailable));
        assert!(!is_recorded_error(&output, &rejected));
    }
}
