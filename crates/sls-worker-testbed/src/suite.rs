use base64::{Engine as _, engine::general_purpose as b64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TestbedError;

/// Timeout for a test that doesn't define one, in milliseconds.
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Outputs larger than this, once encoded as JSON, are not reported.
pub(crate) const OUTPUT_SIZE_LIMIT: usize = 10_000;
pub(crate) const REDACTED_OUTPUT: &str = "REDACTED (payload exceeded size limit)";

pub(crate) const TIMEOUT_ERROR: &str = "Execution timeout exceeded";

#[derive(Debug, Deserialize)]
struct RawTestCase {
    #[serde(default)]
    name: String,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    pub id: usize,
    pub name: String,
    pub input: Value,
    /// Milliseconds the worker has to post a result after taking the test.
    pub timeout: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Success,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuiteStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub status: TestStatus,
    pub error: Value,
    pub execution_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl TestResult {
    /// Result recorded when the test suite itself cannot be loaded.
    pub(crate) fn invalid_suite(error: &TestbedError) -> TestResult {
        TestResult {
            id: 0,
            name: String::new(),
            status: TestStatus::Failed,
            error: format!("Could not parse the tests properly. {error}").into(),
            execution_time: 0,
            output: None,
        }
    }
}

/// Decode a test suite: a JSON array, or the same array encoded as base64.
pub fn parse_tests(raw: &str) -> Result<Vec<TestCase>, TestbedError> {
    let raw = raw.trim();
    let json = if raw.starts_with('[') {
        raw.to_string()
    } else {
        String::from_utf8(b64::STANDARD.decode(raw)?)?
    };

    let cases: Vec<RawTestCase> = serde_json::from_str(&json).map_err(TestbedError::ParseTests)?;

    cases
        .into_iter()
        .enumerate()
        .map(|(id, case)| {
            let name = if case.name.is_empty() {
                format!("Test {}", id + 1)
            } else {
                case.name
            };

            let input = match case.input {
                None | Some(Value::Null) => return Err(TestbedError::MissingTestInput(name)),
                Some(input) => input,
            };

            Ok(TestCase {
                id,
                name,
                input,
                timeout: case.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
                started_at: None,
                completed: false,
            })
        })
        .collect()
}

#[derive(Debug)]
pub(crate) enum Completion {
    /// The worker reported an error for the test.
    Failed,
    /// The worker reported an output.
    Succeeded,
}

/// Progress of a test suite: which tests were handed out and what came back.
#[derive(Debug, Default)]
pub(crate) struct Suite {
    tests: Vec<TestCase>,
    next: usize,
    results: Vec<TestResult>,
    finished: bool,
}

impl Suite {
    pub fn new(tests: Vec<TestCase>) -> Suite {
        Suite {
            tests,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Hand out the next test, in order. `None` once every test was taken.
    pub fn take(&mut self, now: DateTime<Utc>) -> Option<TestCase> {
        let test = self.tests.get_mut(self.next)?;
        test.started_at = Some(now);
        self.next += 1;

        Some(test.clone())
    }

    pub fn complete(
        &mut self,
        id: &str,
        body: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Completion, TestbedError> {
        let test = id
            .parse::<usize>()
            .ok()
            .and_then(|index| self.tests.get_mut(index))
            .filter(|test| test.started_at.is_some())
            .ok_or_else(|| TestbedError::UnknownJob(id.into()))?;

        if test.completed {
            return Err(TestbedError::JobAlreadyCompleted(id.into()));
        }
        test.completed = true;

        let execution_time = elapsed_ms(test.started_at, now);

        let (status, error) = match body.get("error") {
            Some(error) if !error.is_null() => (TestStatus::Failed, error.clone()),
            _ => (TestStatus::Success, Value::String(String::new())),
        };

        self.results.push(TestResult {
            id: test.id,
            name: test.name.clone(),
            status,
            error,
            execution_time,
            output: body.get("output").map(redact_output),
        });

        Ok(match status {
            TestStatus::Failed => Completion::Failed,
            TestStatus::Success => Completion::Succeeded,
        })
    }

    /// Fail a test that didn't complete in time. Returns `false` when the
    /// test completed before its timeout.
    pub fn expire(&mut self, id: usize, now: DateTime<Utc>) -> bool {
        let Some(test) = self.tests.get_mut(id) else {
            return false;
        };
        if test.completed {
            return false;
        }
        test.completed = true;

        self.results.push(TestResult {
            id: test.id,
            name: test.name.clone(),
            status: TestStatus::Failed,
            error: TIMEOUT_ERROR.into(),
            execution_time: elapsed_ms(test.started_at, now),
            output: None,
        });

        true
    }

    /// Whether every test has a result.
    pub fn is_done(&self) -> bool {
        self.tests.iter().all(|test| test.completed)
    }

    pub fn status(&self) -> SuiteStatus {
        let passed = self.is_done()
            && self
                .results
                .iter()
                .all(|result| result.status == TestStatus::Success);

        if passed {
            SuiteStatus::Passed
        } else {
            SuiteStatus::Failed
        }
    }

    /// Mark the suite as finished. Returns `true` only the first time, so
    /// the final report is sent once.
    pub fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.finished, true)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn elapsed_ms(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    started_at
        .map(|started_at| (now - started_at).num_milliseconds())
        .unwrap_or_default()
}

fn redact_output(output: &Value) -> Value {
    let size = serde_json::to_vec(output).map(|v| v.len()).unwrap_or_default();
    if size > OUTPUT_SIZE_LIMIT {
        tracing::warn!(bytes = size, "output payload exceeded size limit; redacted");
        Value::String(REDACTED_OUTPUT.into())
    } else {
        output.clone()
    }
}
