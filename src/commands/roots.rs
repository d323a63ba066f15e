/// `scriptdeps roots` command implementation
use anyhow::{Context, Result};

use super::resolve::resolve_all;
use super::Workspace;
use crate::cli::{CommonConfigArgs, RootsArgs};
use crate::config::parse_duration;
use crate::script::RootHandle;

pub fn run(common: &CommonConfigArgs, args: &RootsArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let timeout = parse_duration(&args.timeout).context("Invalid --timeout")?;
    let scripts = workspace.collect_scripts(&args.scripts)?;

    let manager = workspace.manager()?;
    resolve_all(&manager, &scripts, timeout)?;

    let roots = if args.sources {
        manager.source_roots()
    } else {
        manager.classpath_roots()
    };

    for root in roots.iter() {
        let kind = match root {
            RootHandle::Archive(_) => "archive",
            RootHandle::Directory(_) => "dir",
        };
        println!("{}\t{}", kind, root.path().display());
    }

    manager.dispose();
    Ok(())
}
