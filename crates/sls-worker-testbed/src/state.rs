use chrono::Utc;
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::TestbedError,
    report::Reporter,
    suite::{Completion, Suite, SuiteStatus, TIMEOUT_ERROR, TestCase, TestResult},
};

#[derive(Clone)]
pub(crate) struct TestbedState {
    suite: Arc<Mutex<Suite>>,
    reporter: Reporter,
}

impl TestbedState {
    pub fn new(tests: Vec<TestCase>, reporter: Reporter) -> TestbedState {
        TestbedState {
            suite: Arc::new(Mutex::new(Suite::new(tests))),
            reporter,
        }
    }

    /// Hand out the next test and start its timeout watchdog. Once every
    /// test has a result the final report is sent, tests still running are
    /// reported when they complete or expire.
    pub async fn take(&self) -> Option<TestCase> {
        let mut suite = self.suite.lock().await;

        let Some(test) = suite.take(Utc::now()) else {
            let report = if !suite.is_empty() && suite.is_done() && suite.finish() {
                Some(self.reporter.report(suite.status(), None, suite.results().to_vec()))
            } else {
                None
            };
            drop(suite);

            warn!("no more tests");
            if let Some(report) = report {
                self.reporter.send(&report).await;
            }
            return None;
        };
        drop(suite);

        info!(test_id = test.id, name = ?test.name, timeout = test.timeout, "test taken");
        tokio::spawn(self.clone().watch_timeout(test.id, test.timeout));

        Some(test)
    }

    pub async fn complete(
        &self,
        id: &str,
        body: &Map<String, Value>,
    ) -> Result<Completion, TestbedError> {
        let mut suite = self.suite.lock().await;
        let completion = suite.complete(id, body, Utc::now())?;

        let report = if suite.is_done() && suite.finish() {
            Some(self.reporter.report(suite.status(), None, suite.results().to_vec()))
        } else if let Completion::Failed = completion {
            Some(self.reporter.report(SuiteStatus::Failed, None, suite.results().to_vec()))
        } else {
            None
        };
        if let Completion::Failed = completion {
            warn!(test_id = id, error = ?body.get("error"), "test failed");
        }
        drop(suite);

        debug!(test_id = id, "test result recorded");
        if let Some(report) = report {
            self.reporter.send(&report).await;
        }

        Ok(completion)
    }

    async fn watch_timeout(self, id: usize, timeout: u64) {
        tokio::time::sleep(Duration::from_millis(timeout)).await;

        let mut suite = self.suite.lock().await;
        if !suite.expire(id, Utc::now()) {
            return;
        }
        if suite.is_done() {
            suite.finish();
        }
        let report = self.reporter.report(
            SuiteStatus::Failed,
            Some(TIMEOUT_ERROR.into()),
            suite.results().to_vec(),
        );
        drop(suite);

        warn!(test_id = id, timeout, "test timed out");
        self.reporter.send(&report).await;
    }

    /// Report the end of the worker command, unless the suite already
    /// sent its final report.
    pub async fn command_closed(&self, message: String) {
        let mut suite = self.suite.lock().await;
        if !suite.finish() {
            return;
        }
        let report = self
            .reporter
            .report(SuiteStatus::Failed, Some(message), suite.results().to_vec());
        drop(suite);

        self.reporter.send(&report).await;
    }

    /// Report a suite that couldn't be loaded.
    pub async fn invalid_suite(reporter: &Reporter, error: &TestbedError) {
        let result = TestResult::invalid_suite(error);
        let report = reporter.report(SuiteStatus::Failed, None, vec![result]);
        reporter.send(&report).await;
    }

    #[cfg(test)]
    pub async fn results(&self) -> Vec<TestResult> {
        self.suite.lock().await.results().to_vec()
    }

    #[cfg(test)]
    pub async fn is_finished(&self) -> bool {
        self.suite.lock().await.is_finished()
    }
}
