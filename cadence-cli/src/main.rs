use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod snapshot;

#[derive(Parser)]
#[command(name = "cadence", about = "Cognitive analysis of quiz telemetry")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute features, stability, energy and fingerprint signals offline
    Features(commands::features::FeaturesArgs),
    /// Run the full pipeline, including the classifier
    Analyze(commands::analyze::AnalyzeArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Features(args) => commands::features::run(args),
        Commands::Analyze(args) => commands::analyze::run(args).await,
        Commands::Config(args) => commands::config::run(args),
    }
}
