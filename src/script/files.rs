//! Access to script files
//!
//! The cache never reads the file system directly: validity, modification
//! stamps and contents go through [`ScriptFiles`] so hosts (and tests) can
//! supply their own view of the workspace.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use super::resolver::ScriptContent;

pub trait ScriptFiles: Send + Sync {
    /// Whether the script still exists
    fn is_valid(&self, path: &Path) -> bool;

    /// Value that changes whenever the script changes; `None` if unknown
    fn modification_stamp(&self, path: &Path) -> Option<u64>;

    fn read(&self, path: &Path) -> Result<ScriptContent>;
}

/// Scripts on the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

impl ScriptFiles for LocalFiles {
    fn is_valid(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn modification_stamp(&self, path: &Path) -> Option<u64> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos() as u64;
        // Mix in the length so two writes within one mtime tick still differ
        Some(nanos ^ metadata.len().rotate_left(48))
    }

    fn read(&self, path: &Path) -> Result<ScriptContent> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        Ok(ScriptContent::new(path, text))
    }
}

/// In-memory scripts with explicit modification stamps
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: RwLock<HashMap<PathBuf, (String, u64)>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a script, bumping its stamp
    pub fn write(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let path = path.into();
        let stamp = files.get(&path).map_or(1, |(_, stamp)| stamp + 1);
        files.insert(path, (text.into(), stamp));
    }

    /// Bump a script's stamp without changing its text
    pub fn touch(&self, path: &Path) {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, stamp)) = files.get_mut(path) {
            *stamp += 1;
        }
    }

    pub fn remove(&self, path: &Path) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

impl ScriptFiles for MemoryFiles {
    fn is_valid(&self, path: &Path) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    fn modification_stamp(&self, path: &Path) -> Option<u64> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(|(_, stamp)| *stamp)
    }

    fn read(&self, path: &Path) -> Result<ScriptContent> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let (text, _) = files
            .get(path)
            .with_context(|| format!("Script not found: {}", path.display()))?;
        Ok(ScriptContent::new(path, text.clone()))
    }
}
