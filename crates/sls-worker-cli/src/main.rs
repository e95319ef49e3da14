#![warn(rust_2018_idioms, unused_lifetimes)]
use clap::{Args, CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use sls_worker_runtime::{BoxError, JobPayload, WorkerConfig};
use sls_worker_testbed::Testbed;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serverless worker that answers every job with the job's `input`
#[derive(Clone, Debug, Parser)]
#[command(name = "sls-worker", disable_version_flag = true)]
struct App {
    #[command(subcommand)]
    subcommand: Option<WorkerSubcommand>,
    /// Enable logs in any subcommand. Use `-v` for debug logs, and `-vv` for trace logs
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Print version information
    #[arg(short = 'V', long)]
    version: bool,
}

#[derive(Clone, Debug, Subcommand)]
enum WorkerSubcommand {
    /// Start the worker and process jobs from the job API
    Start(Start),
    /// Start a local job API that feeds test jobs to a worker
    Testbed(Testbed),
}

impl WorkerSubcommand {
    async fn run(self) -> Result<()> {
        match self {
            Self::Start(s) => s.run().await,
            Self::Testbed(t) => t.run().await,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct Start {
    /// Run the handler once with this job JSON instead of polling the job API
    #[arg(long)]
    test_input: Option<String>,

    /// Stop after processing this many jobs
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Milliseconds to wait before asking for a job again when there is none
    #[arg(long)]
    poll_interval: Option<u64>,
}

impl Start {
    async fn run(self) -> Result<()> {
        let mut config = WorkerConfig::load()?;
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval = poll_interval;
        }
        config.max_jobs = self.max_jobs;
        config.test_input = self.test_input;

        tracing::trace!(?config, "starting worker");
        sls_worker_runtime::start_with(config, echo).await?;
        Ok(())
    }
}

async fn echo(job: JobPayload) -> Result<serde_json::Value, BoxError> {
    Ok(sls_worker_handler::handler(&job))
}

fn print_version() -> Result<()> {
    println!("sls-worker {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn print_help() -> Result<()> {
    App::command().print_help().into_diagnostic()
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();

    if app.version {
        return print_version();
    }

    let subcommand = match app.subcommand {
        None => return print_help(),
        Some(subcommand) => subcommand,
    };

    let log_directive = if app.verbose == 0 {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "sls_worker=info".into())
    } else if app.verbose == 1 {
        "sls_worker=debug".into()
    } else {
        "sls_worker=trace".into()
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_directive))
        .with(fmt)
        .init();

    subcommand.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sls_worker_runtime::JobResult;

    #[test]
    fn test_cli_definition() {
        App::command().debug_assert();
    }

    #[test]
    fn test_parse_start() {
        let app = App::try_parse_from([
            "sls-worker",
            "-vv",
            "start",
            "--max-jobs",
            "3",
            "--poll-interval",
            "250",
        ])
        .unwrap();

        assert_eq!(2, app.verbose);
        let Some(WorkerSubcommand::Start(start)) = app.subcommand else {
            panic!("expected the start subcommand");
        };
        assert_eq!(Some(3), start.max_jobs);
        assert_eq!(Some(250), start.poll_interval);
        assert_eq!(None, start.test_input);
    }

    #[test]
    fn test_parse_testbed() {
        let app = App::try_parse_from([
            "sls-worker",
            "testbed",
            "-a",
            "0.0.0.0",
            "-p",
            "8000",
            "--command",
            "/bin/sh -c sls-worker start",
        ])
        .unwrap();

        assert!(matches!(app.subcommand, Some(WorkerSubcommand::Testbed(_))));
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let result = sls_worker_runtime::run_test_input(
            &echo,
            r#"{"id": "job-1", "input": {"prompt": "hello"}}"#,
        )
        .await
        .unwrap();
        assert_eq!(JobResult::Output(json!({"prompt": "hello"})), result);

        let result = sls_worker_runtime::run_test_input(&echo, r#"{"other": 1}"#)
            .await
            .unwrap();
        assert_eq!(JobResult::Output(json!({})), result);
    }
}
