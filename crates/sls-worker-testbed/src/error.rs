use axum::{
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use http_api_problem::ApiError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum TestbedError {
    #[error("invalid testbed configuration: {0}")]
    #[diagnostic()]
    InvalidConfig(#[from] Box<figment::Error>),

    #[error("failed to download the tests from {0}")]
    #[diagnostic()]
    DownloadTests(String, #[source] reqwest::Error),

    #[error("failed to download the tests from {0}, the server answered {1}")]
    #[diagnostic()]
    DownloadTestsStatus(String, reqwest::StatusCode),

    #[error("the tests are not valid base64: {0}")]
    #[diagnostic(help("RUNPOD_TESTS must be a base64 encoded JSON array, a JSON array, or `URL:` followed by a link to either"))]
    DecodeTests(#[from] base64::DecodeError),

    #[error("the decoded tests are not valid UTF-8: {0}")]
    #[diagnostic()]
    TestsNotUtf8(#[from] std::string::FromUtf8Error),

    #[error("the tests are not a valid JSON array of test cases: {0}")]
    #[diagnostic()]
    ParseTests(#[source] serde_json::Error),

    #[error("the test `{0}` doesn't have an input")]
    #[diagnostic()]
    MissingTestInput(String),

    #[error("failed to deserialize the request body: {0}")]
    #[diagnostic()]
    InvalidBody(#[source] serde_json::Error),

    #[error("the request body must be a JSON object")]
    #[diagnostic()]
    BodyNotAnObject,

    #[error("there is no running job with id `{0}`")]
    #[diagnostic()]
    UnknownJob(String),

    #[error("the job `{0}` is already completed")]
    #[diagnostic()]
    JobAlreadyCompleted(String),

    #[error("empty command provided")]
    #[diagnostic()]
    EmptyCommand,

    #[error("failed to start the worker command `{0}`")]
    #[diagnostic()]
    SpawnCommand(String, #[source] std::io::Error),

    #[error("failed to wait for the worker command")]
    #[diagnostic()]
    WaitCommand(#[source] std::io::Error),

    #[error("invalid listen address: {0}")]
    #[diagnostic()]
    InvalidAddress(#[from] std::net::AddrParseError),

    #[error("failed to start the job API server")]
    #[diagnostic()]
    Serve(#[source] std::io::Error),

    #[error("failed to build the http client")]
    #[diagnostic()]
    HttpClient(#[source] reqwest::Error),
}

impl From<figment::Error> for TestbedError {
    fn from(e: figment::Error) -> Self {
        TestbedError::InvalidConfig(Box::new(e))
    }
}

impl TestbedError {
    fn status(&self) -> StatusCode {
        match self {
            TestbedError::InvalidBody(_) | TestbedError::BodyNotAnObject => {
                StatusCode::BAD_REQUEST
            }
            TestbedError::UnknownJob(_) => StatusCode::NOT_FOUND,
            TestbedError::JobAlreadyCompleted(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TestbedError {
    fn into_response(self) -> Response {
        let api_error = ApiError::builder(self.status())
            .message(self.to_string())
            .finish();

        (
            api_error.status(),
            [(CONTENT_TYPE, "application/problem+json")],
            api_error.into_http_api_problem().json_string(),
        )
            .into_response()
    }
}
