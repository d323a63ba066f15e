/// `scriptdeps hints` command implementation
use anyhow::Result;

use super::Workspace;
use crate::cli::{CommonConfigArgs, HintsArgs, HintsCommands};
use crate::cli_utils::scriptdeps_prefix;
use crate::script::FileHints;

pub fn run(common: &CommonConfigArgs, args: &HintsArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;

    match args.command {
        HintsCommands::Clean => {
            if !workspace.hint_dir.exists() {
                println!("{} No hints to clean.", scriptdeps_prefix());
                return Ok(());
            }
            let removed = FileHints::new(&workspace.hint_dir)?.clear()?;
            println!(
                "{} Removed {} hint(s) from {}",
                scriptdeps_prefix(),
                removed,
                workspace.hint_dir.display()
            );
        }
    }

    Ok(())
}
