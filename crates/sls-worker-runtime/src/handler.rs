use serde_json::Value;
use std::future::Future;

use crate::job::{JobPayload, JobResult};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A function that turns a job payload into the value posted back as the
/// job output.
///
/// Implemented for every `Fn(JobPayload) -> impl Future<Output = Result<Value, E>>`,
/// so plain async closures can be registered with [`crate::start`].
pub trait Handler: Send + Sync {
    fn call(&self, job: JobPayload) -> impl Future<Output = Result<Value, BoxError>> + Send;
}

impl<F, Fut, E> Handler for F
where
    F: Fn(JobPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, E>> + Send,
    E: Into<BoxError>,
{
    fn call(&self, job: JobPayload) -> impl Future<Output = Result<Value, BoxError>> + Send {
        let fut = (self)(job);
        async move { fut.await.map_err(Into::into) }
    }
}

pub(crate) async fn invoke<H: Handler>(handler: &H, job: JobPayload) -> JobResult {
    match handler.call(job).await {
        Ok(output) => JobResult::Output(output),
        Err(error) => JobResult::Error(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = |job: JobPayload| async move {
            Ok::<_, BoxError>(job.get("input").cloned().unwrap_or(Value::Null))
        };

        let mut job = JobPayload::new();
        job.insert("input".into(), json!({"n": 1}));

        let result = invoke(&handler, job).await;
        assert_eq!(JobResult::Output(json!({"n": 1})), result);
    }

    #[tokio::test]
    async fn test_handler_error() {
        let handler = |_job: JobPayload| async move { Err::<Value, _>("handler failed") };

        let result = invoke(&handler, JobPayload::new()).await;
        assert_eq!(JobResult::Error("handler failed".into()), result);
    }
}
