//! Sigstream CLI
//!
//! Command-line access to model descriptors, filter design and offline
//! classification.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use sigstream::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Sigstream v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Sigstream v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Inspect { descriptor } => commands::inspect(&descriptor),
        Commands::List { dir } => commands::list(&dir),
        Commands::Design {
            filter_type,
            order,
            low,
            high,
            points,
        } => commands::design(filter_type.into(), order, low, high, points),
        Commands::Classify {
            descriptor,
            samples,
            probabilities,
        } => commands::classify(&descriptor, &samples, probabilities),
    }
}
