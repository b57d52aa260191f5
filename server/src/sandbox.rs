use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use proxycheck_harness::RunResponse;
use proxycheck_harness::ValidationRequest;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::config::SandboxConfig;

/// Output of one harness run: the raw JSON line exactly as the harness wrote
/// it, and its decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRun {
    pub body: String,
    pub response: RunResponse,
}

#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
    app_dir: PathBuf,
    timeout: Duration,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig, timeout: Duration) -> Result<Self> {
        let app_dir = config.resolve_app_dir()?;
        Ok(Self {
            config,
            app_dir,
            timeout,
        })
    }

    /// Runs the harness for `request` and decodes its verdict. Fails when the
    /// harness cannot be started, exits unsuccessfully, overruns the timeout
    /// or prints something other than a JSON response.
    pub async fn run(&self, request: &ValidationRequest) -> Result<SandboxRun> {
        let (program, args) = self.config.command_line(
            &self.app_dir,
            &request.config_text,
            &request.probe_command,
        );
        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("harness timed out after {}ms", self.timeout.as_millis()))?
            .context("failed to collect harness output")?;
        debug!(
            program = %program,
            status = %output.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "harness finished"
        );

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(anyhow!(
                "harness exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let response: RunResponse = serde_json::from_str(&stdout)
            .with_context(|| format!("harness printed invalid JSON: {stdout:?}"))?;
        Ok(SandboxRun {
            body: stdout,
            response,
        })
    }
}
