use figment::{
    Figment,
    providers::{Env, Serialized},
};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use sls_worker_runtime::{ENV_PREFIX, EnvString};
use tracing::{info, trace};

use crate::{
    error::TestbedError,
    suite::{TestCase, parse_tests},
};

/// Variable holding the encoded test suite. It's read verbatim because
/// raw JSON arrays must not go through the environment value parser.
const TESTS_ENV: &str = "RUNPOD_TESTS";

/// Prefix for test suites that must be downloaded first.
const URL_PREFIX: &str = "URL:";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TestbedConfig {
    /// Load the test suite, `RUNPOD_TEST=true`.
    pub test: bool,
    #[serde(skip)]
    pub tests: Option<String>,
    /// Where test reports are posted.
    pub test_webhook_url: Option<String>,
    /// Bearer token for the report webhook.
    pub jwt_token: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pod_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub test_id: Option<String>,
}

impl TestbedConfig {
    pub fn load() -> Result<TestbedConfig, TestbedError> {
        let mut config: TestbedConfig = Figment::from(Serialized::defaults(TestbedConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["tests"]))
            .extract()?;
        config.tests = std::env::var(TESTS_ENV).ok();

        trace!(?config, "testbed configuration loaded");
        Ok(config)
    }

    /// Load the test suite. The suite is empty unless `RUNPOD_TEST` is set.
    pub async fn load_tests(&self) -> Result<Vec<TestCase>, TestbedError> {
        let raw = match (&self.tests, self.test) {
            (Some(raw), true) => raw,
            _ => {
                info!("RUNPOD_TEST is not enabled, no tests to run");
                return Ok(Vec::new());
            }
        };

        let tests = match raw.trim().strip_prefix(URL_PREFIX) {
            Some(url) => parse_tests(&download_tests(url).await?)?,
            None => parse_tests(raw)?,
        };

        info!(tests = tests.len(), "test suite loaded");
        Ok(tests)
    }
}

async fn download_tests(url: &str) -> Result<String, TestbedError> {
    let resp = reqwest::get(url)
        .await
        .map_err(|e| TestbedError::DownloadTests(url.into(), e))?;

    if resp.status() != StatusCode::OK {
        return Err(TestbedError::DownloadTestsStatus(url.into(), resp.status()));
    }

    resp.text()
        .await
        .map_err(|e| TestbedError::DownloadTests(url.into(), e))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<EnvString>::deserialize(deserializer).map(|value| value.map(String::from))
}
