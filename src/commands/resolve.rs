/// `scriptdeps resolve` command implementation
///
/// Resolves each script (cold start, warm-started from disk hints), waits for
/// background resolutions, and prints the resulting dependency sets.
use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};

use super::Workspace;
use crate::cli::{CommonConfigArgs, ResolveArgs};
use crate::config::parse_duration;
use crate::script::{DependencySet, ScriptDependencyManager};

pub fn run(common: &CommonConfigArgs, args: &ResolveArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let timeout = parse_duration(&args.timeout).context("Invalid --timeout")?;
    let scripts = workspace.collect_scripts(&args.scripts)?;

    let manager = workspace.manager()?;
    let resolved = resolve_all(&manager, &scripts, timeout)?;
    manager.dispose();

    if args.json {
        let output: Vec<_> = resolved
            .iter()
            .map(|(script, deps)| {
                json!({
                    "script": script,
                    "classpath": deps.classpath(),
                    "sources": deps.sources(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for (script, deps) in &resolved {
        println!("{}", script.display());
        if deps.is_empty() {
            println!("  (no dependencies)");
        }
        for entry in deps.classpath() {
            println!("  classpath: {}", entry.display());
        }
        for entry in deps.sources() {
            println!("  sources: {}", entry.display());
        }
    }

    Ok(())
}

/// Query every script, then wait for asynchronous resolutions to land
pub(crate) fn resolve_all(
    manager: &ScriptDependencyManager,
    scripts: &[PathBuf],
    timeout: std::time::Duration,
) -> Result<Vec<(PathBuf, DependencySet)>> {
    for script in scripts {
        manager.get_dependencies(script);
    }

    if !manager.await_pending(timeout) {
        anyhow::bail!(
            "Timed out after {}s waiting for {} resolution(s)",
            timeout.as_secs(),
            manager.pending_requests()
        );
    }

    Ok(scripts
        .iter()
        .map(|script| (script.clone(), cached_or_empty(manager, script)))
        .collect())
}

fn cached_or_empty(manager: &ScriptDependencyManager, script: &Path) -> DependencySet {
    manager.cached(script).unwrap_or_default()
}
