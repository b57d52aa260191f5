use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::HarnessError;
use crate::process::SupervisedProcess;
use crate::process::TerminationPolicy;

/// Starts the upstream test server the proxy under test forwards to.
///
/// Nothing checks that the backend is serving; a dead backend shows up as a
/// failed probe.
pub fn start(config: &BackendConfig) -> Result<SupervisedProcess, HarnessError> {
    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .arg("-port")
        .arg(config.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let process = SupervisedProcess::spawn("backend", command, TerminationPolicy::HardKill)?;
    info!(pid = process.pid(), port = config.port, "backend stub started");
    Ok(process)
}
