use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hostfetch")]
#[command(about = "Download worker for jobs queued to this host", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan once, then listen for wake signals until interrupted
    Run(ConfigArgs),
    /// Process the currently queued jobs once and exit
    Scan(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to $HOSTFETCH_CONFIG or config/hostfetch.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
