use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::{error::TestbedError, state::TestbedState, suite::Completion};

pub(crate) fn routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v2/{model}/job-take/{pod_id}", get(job_take))
        .route("/v2/{model}/job-done/{pod_id}/{id}", post(job_done))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn job_take(
    Extension(state): Extension<TestbedState>,
    Path((model, pod_id)): Path<(String, String)>,
) -> Response {
    debug!(model, pod_id, "job take");

    match state.take().await {
        None => StatusCode::NO_CONTENT.into_response(),
        Some(test) => Json(json!({
            "delayTime": 0,
            "error": "",
            "executionTime": test.timeout,
            "id": test.id.to_string(),
            "input": test.input,
            "retries": 0,
            "status": 200,
        }))
        .into_response(),
    }
}

async fn job_done(
    Extension(state): Extension<TestbedState>,
    Path((model, pod_id, id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, TestbedError> {
    debug!(model, pod_id, job_id = id, "job done");

    let payload = match serde_json::from_slice(&body).map_err(TestbedError::InvalidBody)? {
        Value::Object(payload) => payload,
        _ => return Err(TestbedError::BodyNotAnObject),
    };

    let resp = match state.complete(&id, &payload).await? {
        Completion::Failed => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Error found in payload" })),
        )
            .into_response(),
        Completion::Succeeded => Json(json!({
            "status": "completed",
            "message": "Job result recorded",
        }))
        .into_response(),
    };

    Ok(resp)
}
