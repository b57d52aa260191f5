mod api;
mod config;
mod responses;
mod sandbox;

pub use crate::api::AppState;
pub use crate::api::handle_request;
pub use crate::config::SandboxConfig;
pub use crate::config::ServerConfig;
pub use crate::sandbox::SandboxRun;
pub use crate::sandbox::SandboxRunner;

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "proxycheck-server",
    about = "HTTP front end that validates proxy configurations in a sandbox"
)]
pub struct Args {
    /// TOML file overriding the server defaults.
    #[arg(long, env = config::CONFIG_ENV_VAR, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on; overrides `listen_addr` from the config file.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,
}

pub async fn run_main(args: Args) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();

    let mut cfg = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        cfg.listen_addr = listen;
    }

    let runner = SandboxRunner::new(cfg.sandbox.clone(), cfg.run_timeout())?;
    info!(
        sandbox = cfg.sandbox.enabled,
        run_timeout_ms = cfg.run_timeout_ms,
        "starting proxycheck server"
    );
    let state = Arc::new(AppState::new(runner, cfg.max_body_bytes)?);
    api::run_api(state, cfg.listen_addr).await
}
