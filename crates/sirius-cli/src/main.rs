mod commands;
mod image_io;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sirius", about = "Astronomical source extraction tool")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the sky background of images
    Background(commands::background::BackgroundArgs),
    /// Detect and measure sources
    Extract(commands::extract::ExtractArgs),
    /// Print the default extraction config as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Background(args) => commands::background::run(args),
        Commands::Extract(args) => commands::extract::run(args),
        Commands::Config => commands::config::run(),
    }
}
