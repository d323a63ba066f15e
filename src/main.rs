mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use scriptdeps::{cli_utils, config, config_discovery, logging, script};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match &cli.command {
        Commands::Resolve(args) => commands::resolve::run(&cli.common, args),
        Commands::Roots(args) => commands::roots::run(&cli.common, args),
        Commands::Watch(args) => commands::watch::run(&cli.common, args).await,
        Commands::Hints(args) => commands::hints::run(&cli.common, args),
        Commands::Config(args) => commands::config::run(&cli.common, args),
    }
}
