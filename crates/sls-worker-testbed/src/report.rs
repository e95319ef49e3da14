use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::{
    config::TestbedConfig,
    error::TestbedError,
    suite::{SuiteStatus, TestResult},
};

const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of a test run, posted to the report webhook.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub pod_id: Option<String>,
    pub test_id: Option<String>,
    pub results: Vec<TestResult>,
    pub status: SuiteStatus,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct Reporter {
    http: Client,
    webhook_url: Option<String>,
    token: Option<String>,
    pod_id: Option<String>,
    test_id: Option<String>,
}

impl Reporter {
    pub fn new(config: &TestbedConfig) -> Result<Reporter, TestbedError> {
        let http = Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .map_err(TestbedError::HttpClient)?;

        Ok(Reporter {
            http,
            webhook_url: config.test_webhook_url.clone(),
            token: config.jwt_token.clone(),
            pod_id: config.pod_id.clone(),
            test_id: config.test_id.clone(),
        })
    }

    pub fn report(
        &self,
        status: SuiteStatus,
        error: Option<String>,
        results: Vec<TestResult>,
    ) -> Report {
        Report {
            pod_id: self.pod_id.clone(),
            test_id: self.test_id.clone(),
            results,
            status,
            error,
        }
    }

    /// Deliver a report. Delivery problems are logged, never returned, so a
    /// broken webhook doesn't stop the test run.
    pub async fn send(&self, report: &Report) {
        let Some(url) = &self.webhook_url else {
            error!(?report, "RUNPOD_TEST_WEBHOOK_URL not set, skipping report");
            return;
        };

        debug!(?report, url, "sending test report");

        let mut req = self.http.post(url).json(report);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Err(error) => error!(%error, url, "failed to send test report"),
            Ok(resp) if resp.status() != StatusCode::OK => {
                error!(status = %resp.status(), url, "test report rejected")
            }
            Ok(_) => info!(status = ?report.status, results = report.results.len(), "test report sent"),
        }
    }
}
