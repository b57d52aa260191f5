use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::CONFIG_ENV_VAR;
use crate::config::HarnessConfig;
use crate::request::ValidationRequest;

#[derive(Debug, Parser)]
#[command(
    name = "proxycheck-run",
    version,
    about = "Validate one proxy configuration and print the verdict as JSON"
)]
pub struct Cli {
    /// Proxy configuration text to validate.
    pub nginx_config: String,

    /// Client command run against the proxy, e.g. `curl -s localhost:8080/get`.
    pub command: String,

    /// TOML file overriding the harness defaults.
    #[arg(long, env = CONFIG_ENV_VAR, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();

    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    debug!(?config, "harness configuration");

    let request = ValidationRequest::new(cli.nginx_config, cli.command);
    let response = crate::run_validation(&request, &config).await;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &response).context("failed to encode response")?;
    writeln!(stdout).context("failed to write response")?;
    stdout.flush().context("failed to write response")?;
    Ok(())
}
