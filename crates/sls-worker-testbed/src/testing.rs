use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

use crate::{config::TestbedConfig, report::Reporter};

pub(crate) const JWT_TOKEN: &str = "secret-token";

/// A report received by the webhook.
#[derive(Clone, Debug)]
pub(crate) struct Received {
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
pub(crate) struct Webhook {
    received: Arc<Mutex<Vec<Received>>>,
}

impl Webhook {
    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }
}

async fn receive(
    State(webhook): State<Webhook>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    webhook
        .received
        .lock()
        .await
        .push(Received { authorization, body });
    StatusCode::OK
}

/// Serve the report webhook on `/report`, and `tests` on `/tests.json`.
pub(crate) async fn spawn_webhook(tests: &str) -> (SocketAddr, Webhook) {
    let webhook = Webhook::default();
    let tests = tests.to_string();

    let app = Router::new()
        .route("/report", post(receive))
        .route("/tests.json", get(move || async move { tests }))
        .with_state(webhook.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (addr, webhook)
}

/// Reporter posting to the webhook served at `addr`.
pub(crate) fn reporter(addr: SocketAddr) -> Reporter {
    let config = TestbedConfig {
        test_webhook_url: Some(format!("http://{addr}/report")),
        jwt_token: Some(JWT_TOKEN.into()),
        pod_id: Some("pod-1".into()),
        test_id: Some("test-1".into()),
        ..Default::default()
    };
    Reporter::new(&config).unwrap()
}
