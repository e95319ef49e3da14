use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use tracing::{debug, trace};

use crate::{
    config::WorkerConfig,
    error::WorkerError,
    job::{Job, JobResult},
};

/// HTTP client for the job-take and job-done endpoints.
#[derive(Clone, Debug)]
pub(crate) struct JobClient {
    http: Client,
    take_url: String,
    config: WorkerConfig,
}

impl JobClient {
    pub fn new(config: WorkerConfig) -> Result<JobClient, WorkerError> {
        let take_url = config.job_take_url()?;
        // fail early instead of after the first job has been processed
        config.job_done_url("")?;

        let http = Client::builder()
            .build()
            .map_err(WorkerError::HttpClient)?;

        Ok(JobClient {
            http,
            take_url,
            config,
        })
    }

    /// Ask the job API for the next job. `None` means there is nothing to do.
    pub async fn next_job(&self) -> Result<Option<Job>, WorkerError> {
        let mut req = self.http.get(&self.take_url);
        if let Some(key) = &self.config.ai_api_key {
            req = req.header(AUTHORIZATION, key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WorkerError::Request(self.take_url.clone(), e))?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            trace!("no job available");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(WorkerError::UnexpectedStatus {
                status,
                url: self.take_url.clone(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| WorkerError::Request(self.take_url.clone(), e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            trace!("empty job response");
            return Ok(None);
        }

        Job::from_slice(&body).map(Some)
    }

    pub async fn post_result(&self, job_id: &str, result: &JobResult) -> Result<(), WorkerError> {
        let url = self.config.job_done_url(job_id)?;

        let mut req = self.http.post(&url).json(result);
        if let Some(key) = &self.config.ai_api_key {
            req = req.header(AUTHORIZATION, key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| WorkerError::Request(url.clone(), e))?;

        let status = resp.status();
        debug!(%status, job_id, "job result posted");

        if status.is_success() {
            Ok(())
        } else {
            Err(WorkerError::UnexpectedStatus { status, url })
        }
    }
}
