use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{ScriptDepsConfig, CONFIG_FILE_NAME};

/// Discovers scriptdeps configuration by traversing up the directory tree
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    // Fallback to global config
    if let Some(home) = dirs::home_dir() {
        let global_config = home.join(".config/scriptdeps/config.toml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Loaded configuration together with the workspace it applies to
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ScriptDepsConfig,
    /// File the configuration came from, if any
    pub path: Option<PathBuf>,
    /// Directory containing a project-level config, otherwise `start_dir`
    pub workspace_root: PathBuf,
}

/// Loads configuration with auto-discovery support
///
/// If `explicit_path` is provided, loads config from that path. Otherwise
/// walks up from `start_dir`; defaults apply when nothing is found. The
/// result is validated either way.
pub fn load_config_with_discovery(
    explicit_path: Option<&Path>,
    start_dir: &Path,
) -> Result<LoadedConfig> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(start_dir)?,
    };

    let config = match &path {
        Some(path) => ScriptDepsConfig::from_file(path)?,
        None => ScriptDepsConfig::default(),
    };
    config
        .validate()
        .context("Invalid scriptdeps configuration")?;

    let workspace_root = path
        .as_deref()
        .filter(|path| path.file_name().and_then(|n| n.to_str()) == Some(CONFIG_FILE_NAME))
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| start_dir.to_path_buf());

    Ok(LoadedConfig {
        config,
        path,
        workspace_root,
    })
}
