use anyhow::Result;
use clap::Parser;
use proxycheck_server::Args;

#[tokio::main]
async fn main() -> Result<()> {
    proxycheck_server::run_main(Args::parse()).await
}
