use anyhow::Context;
use calha_app::{cli, init_tracing, Config, Services};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let config = Config::load().context("Failed to load config")?;
    init_tracing(&config.log.filter);
    tracing::info!(backend = ?config.storage.backend, "Starting calha");

    let services = Services::build(&config);
    let output = cli::run(args, &config, &services).await?;
    println!("{output}");
    Ok(())
}
