use std::path::PathBuf;

use miette::Diagnostic;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum WorkerError {
    #[error("invalid worker configuration: {0}")]
    InvalidConfig(#[from] Box<figment::Error>),

    #[error("missing `{setting}` setting, set the {env} environment variable or provide a test input")]
    #[diagnostic(help("run `sls-worker start --test-input '{{\"input\": {{}}}}'` to try the handler locally"))]
    MissingSetting {
        setting: &'static str,
        env: &'static str,
    },

    #[error("failed to build the http client")]
    HttpClient(#[source] reqwest::Error),

    #[error("request to {0} failed")]
    Request(String, #[source] reqwest::Error),

    #[error("the job API answered {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("invalid job payload: {0}")]
    InvalidJob(#[from] serde_json::Error),

    #[error("the job payload must be a JSON object")]
    JobNotAnObject,

    #[error("failed to read the test input from {0}")]
    ReadTestInput(PathBuf, #[source] std::io::Error),

    #[error("the worker stopped unexpectedly: {0}")]
    Shutdown(String),
}

impl From<figment::Error> for WorkerError {
    fn from(e: figment::Error) -> Self {
        WorkerError::InvalidConfig(Box::new(e))
    }
}
