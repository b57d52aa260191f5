use clap::Parser;
use proxycheck_harness::Cli;
use proxycheck_harness::run_main;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    run_main(Cli::parse()).await
}
