/// `scriptdeps config` command implementation
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::cli::{CommonConfigArgs, ConfigArgs, ConfigCommands};
use crate::config::ScriptDepsConfig;
use crate::config_discovery::load_config_with_discovery;

pub fn run(common: &CommonConfigArgs, args: &ConfigArgs) -> Result<()> {
    match &args.command {
        ConfigCommands::Generate => generate(),
        ConfigCommands::Validate { path } => {
            validate(path.as_deref().or(common.config.as_deref()))
        }
    }
}

fn generate() -> Result<()> {
    info!("Generating example config");
    println!("{}", ScriptDepsConfig::example()?);
    Ok(())
}

fn validate(path: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let loaded = load_config_with_discovery(path, &cwd)?;

    match &loaded.path {
        Some(path) => println!("✓ Configuration file is valid: {}", path.display()),
        None => println!("✓ No configuration file found, defaults are valid"),
    }

    let config = &loaded.config;
    println!("\nSummary:");
    println!("  - Workspace root: {}", loaded.workspace_root.display());
    println!("  - Hint directory: {}", config.hint_dir(&loaded.workspace_root).display());
    println!("  - Hints enabled: {}", config.cache.hints);
    println!("  - Resolution workers: {}", config.resolution.workers);
    println!("  - Script definitions: {}", config.definitions.len());

    for (i, definition) in config.definitions.iter().enumerate() {
        println!(
            "    {}. {} ({}, {:?})",
            i + 1,
            definition.name,
            definition.pattern,
            definition.kind
        );
    }

    Ok(())
}
