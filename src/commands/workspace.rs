/// Workspace setup shared by the commands
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cli::CommonConfigArgs;
use crate::cli_utils::scriptdeps_prefix;
use crate::config::ScriptDepsConfig;
use crate::config_discovery::load_config_with_discovery;
use crate::script::dependencies::normalize_path;
use crate::script::notifier::NoopNotifier;
use crate::script::{
    DiskHint, FileHints, HostExecutor, InlineExecutor, LocalFiles, NoHints, RootsNotifier,
    ScriptDefinition, ScriptDependencyManager, WorkspaceFilter,
};

pub struct Workspace {
    pub root: PathBuf,
    pub config: ScriptDepsConfig,
    pub hint_dir: PathBuf,
    hints_enabled: bool,
    workers: usize,
    definitions: Vec<ScriptDefinition>,
}

impl Workspace {
    /// Load configuration and apply command-line overrides
    pub fn load(args: &CommonConfigArgs) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let loaded = load_config_with_discovery(args.config.as_deref(), &cwd)?;

        if let Some(path) = &loaded.path {
            info!("{} Using config: {}", scriptdeps_prefix(), path.display());
        }

        let root = normalize_path(&loaded.workspace_root);
        let config = loaded.config;

        let hint_dir = match &args.hint_dir {
            Some(dir) => cwd.join(dir),
            None => config.hint_dir(&root),
        };
        let workers = args.workers.unwrap_or(config.resolution.workers);
        if workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }

        Ok(Self {
            definitions: config.script_definitions()?,
            hints_enabled: config.cache.hints && !args.no_hints,
            root,
            config,
            hint_dir,
            workers,
        })
    }

    pub fn manager(&self) -> Result<ScriptDependencyManager> {
        self.manager_with(Arc::new(NoopNotifier), Arc::new(InlineExecutor))
    }

    pub fn manager_with(
        &self,
        notifier: Arc<dyn RootsNotifier>,
        executor: Arc<dyn HostExecutor>,
    ) -> Result<ScriptDependencyManager> {
        let hint: Arc<dyn DiskHint> = if self.hints_enabled {
            Arc::new(FileHints::new(&self.hint_dir)?)
        } else {
            Arc::new(NoHints)
        };

        ScriptDependencyManager::builder(Arc::new(LocalFiles))
            .definitions(self.definitions.clone())
            .hint(hint)
            .notifier(notifier)
            .executor(executor)
            .workers(self.workers)
            .build()
    }

    pub fn filter(&self) -> WorkspaceFilter {
        WorkspaceFilter::new(
            &self.root,
            &self.config.workspace.content_roots,
            &self.config.workspace.metadata_dirs,
            self.config.workspace.test_mode,
        )
    }

    /// Expand command-line arguments into script paths
    ///
    /// Files are taken as given; directories are scanned for files matching
    /// a script definition, skipping metadata directories.
    pub fn collect_scripts(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let mut scripts = Vec::new();

        for input in inputs {
            let path = normalize_path(&cwd.join(input));
            if path.is_dir() {
                scripts.extend(self.scan(&path));
            } else if path.exists() {
                scripts.push(path);
            } else {
                anyhow::bail!("Script not found: {}", input.display());
            }
        }

        scripts.sort();
        scripts.dedup();
        debug!("Collected {} script(s)", scripts.len());
        Ok(scripts)
    }

    fn scan(&self, dir: &Path) -> Vec<PathBuf> {
        let metadata_dirs = &self.config.workspace.metadata_dirs;
        WalkDir::new(dir)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| metadata_dirs.iter().any(|dir| dir == name))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.definitions.iter().any(|d| d.matches(path)))
            .collect()
    }
}
