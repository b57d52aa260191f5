// The harness binary reserves stdout for the JSON response.
#![deny(clippy::print_stdout)]

pub mod backend;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod probe;
pub mod process;
pub mod proxy;
pub mod request;
pub mod workspace;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;
use tracing::info;

pub use classify::RunResponse;
pub use cli::Cli;
pub use cli::run_main;
pub use config::HarnessConfig;
pub use error::HarnessError;
pub use request::ValidationRequest;

use crate::classify::Evidence;
use crate::probe::ProbeCommand;
use crate::proxy::ProxyState;
use crate::proxy::ProxySupervisor;
use crate::workspace::RunWorkspace;

/// Runs one validation: writes the config into a fresh workspace, starts the
/// backend stub and the proxy, probes the proxy if it survived startup and
/// classifies what happened. Every process and file the run created is gone
/// by the time this returns.
pub async fn run_validation(request: &ValidationRequest, config: &HarnessConfig) -> RunResponse {
    let mut rng = StdRng::from_os_rng();
    run_validation_with_rng(request, config, &mut rng).await
}

/// [`run_validation`] with an explicit random source for workspace names.
pub async fn run_validation_with_rng<R: Rng>(
    request: &ValidationRequest,
    config: &HarnessConfig,
    rng: &mut R,
) -> RunResponse {
    let evidence = match gather_evidence(request, config, rng).await {
        Ok(evidence) => evidence,
        Err(err) => Evidence::Aborted(err),
    };
    let verdict = classify::classify(evidence, &config.proxy.error_marker);
    match &verdict.error {
        Some(err) => info!(error = %err, "validation failed"),
        None => info!("validation succeeded"),
    }
    verdict.into()
}

async fn gather_evidence<R: Rng>(
    request: &ValidationRequest,
    config: &HarnessConfig,
    rng: &mut R,
) -> Result<Evidence, HarnessError> {
    let mut workspace = RunWorkspace::acquire(&config.workspace_parent, rng)?;
    workspace.write_config(&request.config_text)?;

    let backend = backend::start(&config.backend)?;
    let proxy = match ProxySupervisor::start(&config.proxy, &workspace).await {
        Ok(proxy) => proxy,
        Err(err) => {
            backend.terminate().await;
            return Err(err);
        }
    };

    let evidence = match proxy.state() {
        ProxyState::Crashed { status } => Ok(Evidence::Crashed {
            status,
            error_log: workspace.read_error_log(),
        }),
        ProxyState::PresumedHealthy => probe_proxy(request, config, &workspace).await,
    };

    proxy.terminate().await;
    backend.terminate().await;
    workspace.release();
    evidence
}

async fn probe_proxy(
    request: &ValidationRequest,
    config: &HarnessConfig,
    workspace: &RunWorkspace,
) -> Result<Evidence, HarnessError> {
    let command = ProbeCommand::parse(&request.probe_command, &config.probe.allowed_clients)?;
    debug!(client = command.client(), args = ?command.args(), "probing proxy");
    let probe = command.run(config.probe.timeout()).await?;
    Ok(Evidence::Probed {
        client: command.client().to_string(),
        probe,
        error_log: workspace.read_error_log(),
    })
}
