use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::trace;

use crate::error::WorkerError;

/// Prefix of the environment variables the job platform injects in workers.
pub const ENV_PREFIX: &str = "RUNPOD_";

/// Placeholder for the pod id in the job-take URL, and for the job id in
/// the job-done URL.
const ID_PLACEHOLDER: &str = "$ID";

/// Placeholder for the pod id in the job-done URL.
const POD_ID_PLACEHOLDER: &str = "$RUNPOD_POD_ID";

const DEFAULT_POD_ID: &str = "local";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// URL template used to take the next job, `$ID` is the pod id.
    pub webhook_get_job: Option<String>,
    /// URL template used to post job results, `$RUNPOD_POD_ID` is the pod id
    /// and `$ID` is the job id.
    pub webhook_post_output: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub pod_id: String,
    /// Value of the `Authorization` header sent to the job API.
    pub ai_api_key: Option<String>,
    /// Milliseconds to wait before asking for a job again when there is none.
    pub poll_interval: u64,
    /// Stop after processing this many jobs.
    #[serde(skip)]
    pub max_jobs: Option<usize>,
    /// Run the handler once with this payload instead of polling for jobs.
    #[serde(skip)]
    pub test_input: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            webhook_get_job: None,
            webhook_post_output: None,
            pod_id: DEFAULT_POD_ID.into(),
            ai_api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            max_jobs: None,
            test_input: None,
        }
    }
}

impl WorkerConfig {
    /// Load the configuration from `RUNPOD_` environment variables.
    pub fn load() -> Result<WorkerConfig, WorkerError> {
        let config: WorkerConfig = Self::figment().extract()?;
        trace!(?config, "worker configuration loaded");
        Ok(config)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(WorkerConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn job_take_url(&self) -> Result<String, WorkerError> {
        let template = self
            .webhook_get_job
            .as_deref()
            .ok_or(WorkerError::MissingSetting {
                setting: "webhook_get_job",
                env: "RUNPOD_WEBHOOK_GET_JOB",
            })?;

        Ok(template.replace(ID_PLACEHOLDER, &self.pod_id))
    }

    pub fn job_done_url(&self, job_id: &str) -> Result<String, WorkerError> {
        let template =
            self.webhook_post_output
                .as_deref()
                .ok_or(WorkerError::MissingSetting {
                    setting: "webhook_post_output",
                    env: "RUNPOD_WEBHOOK_POST_OUTPUT",
                })?;

        Ok(template
            .replace(POD_ID_PLACEHOLDER, &self.pod_id)
            .replace(ID_PLACEHOLDER, job_id))
    }
}

/// A string read from the environment. Values that look like numbers
/// reach serde as numbers, ids must stay strings.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvString(pub String);

impl<'de> Deserialize<'de> for EnvString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Lenient {
            String(String),
            Unsigned(u64),
            Signed(i64),
            Float(f64),
        }

        Ok(EnvString(match Lenient::deserialize(deserializer)? {
            Lenient::String(s) => s,
            Lenient::Unsigned(n) => n.to_string(),
            Lenient::Signed(n) => n.to_string(),
            Lenient::Float(n) => n.to_string(),
        }))
    }
}

impl From<EnvString> for String {
    fn from(value: EnvString) -> String {
        value.0
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    EnvString::deserialize(deserializer).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = WorkerConfig::load().unwrap();
            assert_eq!(None, config.webhook_get_job);
            assert_eq!(None, config.webhook_post_output);
            assert_eq!("local", config.pod_id);
            assert_eq!(Duration::from_secs(1), config.poll_interval());
            Ok(())
        });
    }

    #[test]
    fn test_load_from_environment() {
        Jail::expect_with(|jail| {
            jail.set_env(
                "RUNPOD_WEBHOOK_GET_JOB",
                "http://localhost:19981/v2/model/job-take/$ID",
            );
            jail.set_env(
                "RUNPOD_WEBHOOK_POST_OUTPUT",
                "http://localhost:19981/v2/model/job-done/$RUNPOD_POD_ID/$ID",
            );
            jail.set_env("RUNPOD_POD_ID", "pod-a1");
            jail.set_env("RUNPOD_AI_API_KEY", "secret");
            jail.set_env("RUNPOD_POLL_INTERVAL", "250");

            let config = WorkerConfig::load().unwrap();
            assert_eq!(Some("secret".to_string()), config.ai_api_key);
            assert_eq!(Duration::from_millis(250), config.poll_interval());
            assert_eq!(
                "http://localhost:19981/v2/model/job-take/pod-a1",
                config.job_take_url().unwrap()
            );
            assert_eq!(
                "http://localhost:19981/v2/model/job-done/pod-a1/job-7",
                config.job_done_url("job-7").unwrap()
            );
            Ok(())
        });
    }

    #[test]
    fn test_numeric_pod_id() {
        Jail::expect_with(|jail| {
            jail.set_env("RUNPOD_POD_ID", "12345");

            let config = WorkerConfig::load().unwrap();
            assert_eq!("12345", config.pod_id);
            Ok(())
        });
    }

    #[test]
    fn test_missing_webhooks() {
        let config = WorkerConfig::default();

        let err = config.job_take_url().unwrap_err();
        assert!(matches!(
            err,
            WorkerError::MissingSetting {
                env: "RUNPOD_WEBHOOK_GET_JOB",
                ..
            }
        ));

        let err = config.job_done_url("1").unwrap_err();
        assert!(matches!(
            err,
            WorkerError::MissingSetting {
                env: "RUNPOD_WEBHOOK_POST_OUTPUT",
                ..
            }
        ));
    }

    #[test]
    fn test_env_string() {
        let ids: Vec<EnvString> = serde_json::from_str(r#"["pod-a", 42, -7, 1.5]"#).unwrap();
        let ids: Vec<String> = ids.into_iter().map(String::from).collect();
        assert_eq!(vec!["pod-a", "42", "-7", "1.5"], ids);
    }
}
