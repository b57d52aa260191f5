//! Supervision of the proxy under test.
//!
//! The proxy is started against the workspace config and then raced against
//! a short grace window. A proxy that cannot parse its config or bind its
//! listeners exits almost immediately, so exiting inside the window is
//! treated as a crash. A proxy still running when the window closes is
//! presumed healthy; whether it actually serves correctly is left to the
//! probe.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::process::ExitStatus;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;
use tracing::warn;

use crate::config::ProxyConfig;
use crate::error::HarnessError;
use crate::process::SupervisedProcess;
use crate::process::TerminationPolicy;
use crate::workspace::RunWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// Exited before the grace window closed. `status` is `None` when the
    /// exit could not be collected.
    Crashed { status: Option<ExitStatus> },
    /// Still running when the grace window closed. Not polled afterwards.
    PresumedHealthy,
}

/// Command-line flags that point the proxy at the workspace: config file,
/// error log, foreground mode and a pid file unique to this run.
pub fn proxy_args(workspace: &RunWorkspace) -> Vec<String> {
    vec![
        "-c".to_string(),
        workspace.config_path().display().to_string(),
        "-e".to_string(),
        workspace.error_log_path().display().to_string(),
        "-g".to_string(),
        format!("daemon off; pid {};", workspace.pid_file_path().display()),
    ]
}

#[derive(Debug)]
pub struct ProxySupervisor {
    process: SupervisedProcess,
    state: ProxyState,
}

impl ProxySupervisor {
    /// Spawns the proxy and resolves the exit-versus-grace-window race. The
    /// configuration must already be written to the workspace.
    pub async fn start(
        config: &ProxyConfig,
        workspace: &RunWorkspace,
    ) -> Result<Self, HarnessError> {
        let error_log = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(workspace.error_log_path())
            .map_err(|err| HarnessError::resource(workspace.error_log_path(), err))?;

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .args(proxy_args(workspace))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(error_log));

        let mut process = SupervisedProcess::spawn(
            "proxy",
            command,
            TerminationPolicy::GracefulTerminate {
                timeout: config.terminate_timeout(),
            },
        )?;

        let grace = config.grace_period();
        let state = tokio::select! {
            status = process.wait() => {
                let status = match status {
                    Ok(status) => Some(status),
                    Err(err) => {
                        warn!(error = %err, "failed to collect proxy exit status");
                        None
                    }
                };
                ProxyState::Crashed { status }
            }
            _ = tokio::time::sleep(grace) => ProxyState::PresumedHealthy,
        };

        match state {
            ProxyState::Crashed { status } => info!(
                pid = process.pid(),
                status = ?status,
                "proxy exited during grace window"
            ),
            ProxyState::PresumedHealthy => info!(
                pid = process.pid(),
                grace_ms = grace.as_millis() as u64,
                "proxy survived grace window"
            ),
        }

        Ok(Self { process, state })
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Brings the proxy down. Called on every terminal path, including after
    /// a crash, so that any workers it forked go with it.
    pub async fn terminate(self) {
        self.process.terminate().await;
    }
}
