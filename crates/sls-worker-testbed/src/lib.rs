use axum::extract::Extension;
use clap::Args;
use miette::Result;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};
use tokio::{net::TcpListener, time::Duration};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, trace};

mod command;
mod config;
pub use config::TestbedConfig;
mod error;
pub use error::TestbedError;
mod report;
pub use report::Report;
use report::Reporter;
mod router;
mod state;
use state::TestbedState;
mod suite;
pub use suite::{SuiteStatus, TestCase, TestResult, TestStatus, parse_tests};
#[cfg(test)]
mod testing;

/// Pod id handed to the worker command when none is configured.
const DEFAULT_POD_ID: &str = "local";

#[derive(Args, Clone, Debug)]
#[command(name = "testbed")]
pub struct Testbed {
    /// Address where the job API listens
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    address: String,

    /// Port where the job API listens
    #[arg(short = 'p', long, env = "PORT", default_value_t = 19981)]
    port: u16,

    /// Worker command to start once the job API is ready
    #[arg(long)]
    command: Option<String>,

    /// Model name used in the job API paths given to the worker command
    #[arg(long, default_value = "local")]
    model: String,
}

impl Testbed {
    pub async fn run(&self) -> Result<()> {
        trace!(options = ?self, "starting testbed");

        let ip = IpAddr::from_str(&self.address).map_err(TestbedError::InvalidAddress)?;
        let addr = SocketAddr::from((ip, self.port));

        let config = TestbedConfig::load()?;
        let reporter = Reporter::new(&config)?;

        let tests = match config.load_tests().await {
            Ok(tests) => tests,
            Err(err) => {
                TestbedState::invalid_suite(&reporter, &err).await;
                return Err(err.into());
            }
        };

        let state = TestbedState::new(tests, reporter);
        let worker = self.command.clone().map(|cmd| {
            let pod_id = config.pod_id.as_deref().unwrap_or(DEFAULT_POD_ID);
            (cmd, worker_env(addr, &self.model, pod_id))
        });

        Toplevel::new(move |s| async move {
            let server_state = state.clone();
            s.start(SubsystemBuilder::new("job API server", move |s| {
                start_server(s, addr, server_state)
            }));

            if let Some((cmd, env)) = worker {
                s.start(SubsystemBuilder::new("worker command", move |s| {
                    command::run_worker_command(s, state, cmd, env)
                }));
            }
        })
        .catch_signals()
        .handle_shutdown_requests(Duration::from_millis(1000))
        .await
        .map_err(|e| miette::miette!("{}", e))
    }
}

async fn start_server(
    subsys: SubsystemHandle,
    addr: SocketAddr,
    state: TestbedState,
) -> Result<(), TestbedError> {
    let app = router::routes()
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new());

    let listener = TcpListener::bind(addr).await.map_err(TestbedError::Serve)?;
    info!("job API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { subsys.on_shutdown_requested().await })
        .await
        .map_err(TestbedError::Serve)
}

/// Environment for the worker command, pointing its job webhooks at the testbed.
fn worker_env(addr: SocketAddr, model: &str, pod_id: &str) -> Vec<(String, String)> {
    let mut addr = addr;
    if addr.ip().is_unspecified() {
        addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    let base = format!("http://{addr}/v2/{model}");

    vec![
        (
            "RUNPOD_WEBHOOK_GET_JOB".into(),
            format!("{base}/job-take/$ID"),
        ),
        (
            "RUNPOD_WEBHOOK_POST_OUTPUT".into(),
            format!("{base}/job-done/$RUNPOD_POD_ID/$ID"),
        ),
        ("RUNPOD_POD_ID".into(), pod_id.into()),
        ("RUNPOD_LOG_LEVEL".into(), "INFO".into()),
    ]
}
