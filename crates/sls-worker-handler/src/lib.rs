//! Echo handler for serverless jobs.
//!
//! The worker runtime hands every job payload to [`handler`], which records
//! the payload in the logs and answers with the payload's `input` field.

use serde_json::{Map, Value};
use tracing::info;

/// Key of the job payload that carries the caller's input.
pub const INPUT_KEY: &str = "input";

/// Logs the job and returns its `input` field.
///
/// Jobs without an `input` field produce an empty object. The payload is
/// only read, never modified.
pub fn handler(job: &Map<String, Value>) -> Value {
    info!(job = %payload_json(job), "job received");

    job.get(INPUT_KEY)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn payload_json(job: &Map<String, Value>) -> String {
    // a map with string keys always serializes
    serde_json::to_string(job).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        fmt,
        sync::{Arc, Mutex},
    };
    use tracing::{
        Event, Level, Subscriber,
        field::{Field, Visit},
    };
    use tracing_subscriber::{
        layer::{Context, SubscriberExt},
        Layer,
    };

    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

    impl<S: Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = FieldRecorder::default();
            event.record(&mut fields);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), fields.0));
        }
    }

    #[derive(Default)]
    struct FieldRecorder(String);

    impl Visit for FieldRecorder {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push_str(&format!("{}={:?} ", field.name(), value));
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<(Level, String)>) {
        let events = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        let out = tracing::subscriber::with_default(subscriber, f);
        let captured = events.0.lock().unwrap().clone();
        (out, captured)
    }

    #[test]
    fn test_returns_input() {
        let job = object(json!({"input": {"prompt": "hello"}}));
        assert_eq!(json!({"prompt": "hello"}), handler(&job));
    }

    #[test]
    fn test_missing_input_returns_empty_object() {
        assert_eq!(json!({}), handler(&Map::new()));

        let job = object(json!({"other": 1}));
        assert_eq!(json!({}), handler(&job));
    }

    #[test]
    fn test_non_object_input_is_returned_unchanged() {
        let job = object(json!({"input": [1, "two", null]}));
        assert_eq!(json!([1, "two", null]), handler(&job));

        let job = object(json!({"input": null}));
        assert_eq!(Value::Null, handler(&job));
    }

    #[test]
    fn test_other_fields_are_ignored() {
        let job = object(json!({"id": "job-1", "input": {"n": 3}, "retries": 0}));
        assert_eq!(json!({"n": 3}), handler(&job));
    }

    #[test]
    fn test_does_not_mutate_the_job() {
        let job = object(json!({"id": "abc", "input": {"prompt": "hello"}}));
        let before = job.clone();

        let _ = handler(&job);
        assert_eq!(before, job);
    }

    #[test]
    fn test_logs_the_job_once() {
        let job = object(json!({"input": {"prompt": "hello"}}));
        let (out, events) = capture(|| handler(&job));

        assert_eq!(json!({"prompt": "hello"}), out);
        assert_eq!(1, events.len());

        let (level, fields) = &events[0];
        assert_eq!(Level::INFO, *level);
        assert!(
            fields.contains(r#"job={"input":{"prompt":"hello"}}"#),
            "unexpected log fields: {fields}"
        );
    }

    #[test]
    fn test_logs_empty_job() {
        let (_, events) = capture(|| handler(&Map::new()));

        assert_eq!(1, events.len());
        assert!(events[0].1.contains("job={}"), "{}", events[0].1);
    }
}
