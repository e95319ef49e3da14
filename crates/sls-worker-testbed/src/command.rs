use std::process::Stdio;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{error, info, warn};

use crate::{error::TestbedError, state::TestbedState};

/// Shell wrappers that container runtimes put in front of the real command.
const SHELL_PREFIXES: [&str; 2] = ["/bin/sh -c", "/bin/bash -o pipefail -c"];

/// Split a worker command into the program and its arguments.
pub(crate) fn parse_command(cmd: &str) -> Result<(String, Vec<String>), TestbedError> {
    let mut cmd = cmd.trim();
    for prefix in SHELL_PREFIXES {
        match cmd.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                cmd = rest.trim_start();
            }
            _ => {}
        }
    }

    let mut parts = cmd.split_whitespace().map(String::from);
    let program = parts.next().ok_or(TestbedError::EmptyCommand)?;

    Ok((program, parts.collect()))
}

pub(crate) async fn run_worker_command(
    subsys: SubsystemHandle,
    state: TestbedState,
    cmd: String,
    env: Vec<(String, String)>,
) -> Result<(), TestbedError> {
    let (program, args) = parse_command(&cmd)?;
    info!(program, ?args, "starting worker command");

    let mut child = Command::new(&program)
        .args(&args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TestbedError::SpawnCommand(cmd.clone(), e))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, true));
    }

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(TestbedError::WaitCommand)?;
            if status.success() {
                info!(%status, "worker command finished");
            } else {
                error!(%status, "worker command failed");
            }

            state.command_closed(format!("Command closed: {status}")).await;
            subsys.request_shutdown();
        },
        _ = subsys.on_shutdown_requested() => {
            info!("stopping worker command");
            if let Err(error) = child.kill().await {
                warn!(%error, "failed to stop the worker command");
            }
        }
    }

    Ok(())
}

async fn forward_output<R>(output: R, stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if stderr => warn!(target: "sls_worker_testbed::worker", "{line}"),
            Ok(Some(line)) => info!(target: "sls_worker_testbed::worker", "{line}"),
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "failed to read the worker output");
                break;
            }
        }
    }
}
