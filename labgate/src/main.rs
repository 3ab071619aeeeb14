mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "labgate.yaml")]
    config: PathBuf,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the LabGate API server
    Run,
    /// Create a password hash for seeding user accounts
    Hash,
    /// Validate the config file
    Check,
}

fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "labgate=info")
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Hash => crate::commands::hash::command().await,
        Commands::Check => crate::commands::check::command(&cli).await,
    }
}
