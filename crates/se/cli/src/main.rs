//! `meterid`: offline certificate tooling and simulated trust-gate runs

use clap::Parser;

mod commands;
mod utils;

use commands::*;

#[derive(Parser)]
#[command(version, about = "Metering endpoint secure element tooling")]
struct Cli {
    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Crc { data } => crc_command(data),
        Commands::Decode { partial } => decode_command(partial),
        Commands::Rebuild(args) => rebuild_command(args),
        Commands::Simulate(args) => simulate_command(args),
        Commands::Rotate(args) => rotate_command(args),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
