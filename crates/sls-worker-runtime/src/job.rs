use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkerError;

/// Untyped job payload as delivered by the job API.
pub type JobPayload = Map<String, Value>;

/// Job id used when the handler runs against a local test input.
pub(crate) const LOCAL_TEST_JOB_ID: &str = "local_test";

#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub id: Option<String>,
    pub payload: JobPayload,
}

impl Job {
    pub fn from_payload(payload: JobPayload) -> Job {
        let id = match payload.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };

        Job { id, payload }
    }

    pub fn from_slice(body: &[u8]) -> Result<Job, WorkerError> {
        match serde_json::from_slice(body)? {
            Value::Object(payload) => Ok(Job::from_payload(payload)),
            _ => Err(WorkerError::JobNotAnObject),
        }
    }
}

/// Result posted back to the job API once the handler finishes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobResult {
    Output(Value),
    Error(String),
}

impl JobResult {
    pub fn is_error(&self) -> bool {
        matches!(self, JobResult::Error(_))
    }
}
