//! Persistent warm-start hints
//!
//! The last known dependency set of each script is kept on disk so that a new
//! session can answer queries before the first resolution finishes. Hints are
//! best effort: unreadable, corrupt or outdated records are cache misses and
//! write failures are ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::dependencies::{artifact_key, DependencySet};
use crate::logging::operations;

const HINT_VERSION: u32 = 1;

pub trait DiskHint: Send + Sync {
    fn read(&self, script: &Path) -> Option<DependencySet>;

    fn write(&self, script: &Path, dependencies: &DependencySet);
}

/// Hint store that remembers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHints;

impl DiskHint for NoHints {
    fn read(&self, _script: &Path) -> Option<DependencySet> {
        None
    }

    fn write(&self, _script: &Path, _dependencies: &DependencySet) {}
}

#[derive(Debug, Serialize, Deserialize)]
struct HintRecord {
    version: u32,
    script: String,
    written_at: DateTime<Utc>,
    classpath: Vec<PathBuf>,
    sources: Vec<PathBuf>,
}

/// One JSON record per script under a hint directory
///
/// Layout: `<dir>/<sha256(script key)>.json`
#[derive(Debug, Clone)]
pub struct FileHints {
    dir: PathBuf,
}

impl FileHints {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create hint directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn try_read(&self, key: &str) -> Result<Option<DependencySet>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read hint: {}", path.display()))?;
        let record: HintRecord = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse hint: {}", path.display()))?;

        if record.version != HINT_VERSION || record.script != key {
            return Ok(None);
        }

        Ok(Some(DependencySet::new(record.classpath, record.sources)))
    }

    fn try_write(&self, key: &str, dependencies: &DependencySet) -> Result<()> {
        let record = HintRecord {
            version: HINT_VERSION,
            script: key.to_string(),
            written_at: Utc::now(),
            classpath: dependencies.classpath().to_vec(),
            sources: dependencies.sources().to_vec(),
        };
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize hint")?;

        // Write then rename so readers never see a partial record
        let path = self.record_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write hint: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move hint into place: {}", path.display()))?;
        Ok(())
    }

    /// Remove every hint record, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read hint directory: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove hint: {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl DiskHint for FileHints {
    fn read(&self, script: &Path) -> Option<DependencySet> {
        match self.try_read(&artifact_key(script)) {
            Ok(hint) => hint,
            Err(e) => {
                debug!("Ignoring hint for {}: {:#}", script.display(), e);
                None
            }
        }
    }

    fn write(&self, script: &Path, dependencies: &DependencySet) {
        let key = artifact_key(script);
        match self.try_write(&key, dependencies) {
            Ok(()) => debug!(operation = operations::WRITE_HINT, script = %key, "Stored hint"),
            Err(e) => debug!("Failed to store hint for {}: {:#}", script.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let hints = FileHints::new(temp.path().join("hints")).unwrap();
        let script = Path::new("/ws/build.kts");
        let deps = DependencySet::new(["/libs/a.jar", "/libs/b.jar"], ["/src"]);

        assert!(hints.read(script).is_none());
        hints.write(script, &deps);

        assert_eq!(hints.read(script), Some(deps));
        assert!(hints.read(Path::new("/ws/other.kts")).is_none());
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let hints = FileHints::new(temp.path()).unwrap();
        let script = Path::new("/ws/build.kts");

        fs::write(hints.record_path(&artifact_key(script)), "{ not json").unwrap();
        assert!(hints.read(script).is_none());
    }

    #[test]
    fn test_outdated_version_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let hints = FileHints::new(temp.path()).unwrap();
        let script = Path::new("/ws/build.kts");
        let key = artifact_key(script);

        let record = HintRecord {
            version: HINT_VERSION + 1,
            script: key.clone(),
            written_at: Utc::now(),
            classpath: vec![PathBuf::from("/libs/a.jar")],
            sources: Vec::new(),
        };
        fs::write(
            hints.record_path(&key),
            serde_json::to_string(&record).unwrap(),
        )
        .unwrap();

        assert!(hints.read(script).is_none());
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let hints = FileHints::new(temp.path()).unwrap();
        let deps = DependencySet::new(["/libs/a.jar"], Vec::<PathBuf>::new());

        hints.write(Path::new("/ws/a.kts"), &deps);
        hints.write(Path::new("/ws/b.kts"), &deps);

        assert_eq!(hints.clear().unwrap(), 2);
        assert!(hints.read(Path::new("/ws/a.kts")).is_none());
    }

    #[test]
    fn test_no_hints() {
        let deps = DependencySet::new(["/libs/a.jar"], Vec::<PathBuf>::new());
        NoHints.write(Path::new("/ws/a.kts"), &deps);
        assert!(NoHints.read(Path::new("/ws/a.kts")).is_none());
    }
}
