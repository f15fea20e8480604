mod cli;
mod daemon;

use clap::Parser;
use cli::{Cli, Commands};
use hostfetch::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = Config::load(args.config)?;
            daemon::run(config).await?;
        }
        Commands::Scan(args) => {
            let config = Config::load(args.config)?;
            let summary = daemon::scan_once(config).await?;
            tracing::info!(?summary, "Scan finished");
        }
    }

    Ok(())
}
