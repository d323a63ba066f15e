//! Lookup-ready roots built from dependency paths
//!
//! Classpath and source entries are plain paths. Before they can be searched
//! they are resolved against the file system: directories become directory
//! roots, regular files (jars, zips) become archive roots, and entries that no
//! longer exist are skipped.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::dependencies::normalize_path;

/// A resolved root that lookups can be performed against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootHandle {
    /// A directory of classes or sources
    Directory(PathBuf),
    /// An archive file (jar, zip) searched as a whole
    Archive(PathBuf),
}

impl RootHandle {
    /// Resolve a single entry, returning `None` if it does not exist on disk
    pub fn from_entry(entry: &Path) -> Option<Self> {
        let metadata = match fs::metadata(entry) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping missing root {}: {}", entry.display(), e);
                return None;
            }
        };

        let canonical = normalize_path(entry);
        if metadata.is_dir() {
            Some(Self::Directory(canonical))
        } else if metadata.is_file() {
            Some(Self::Archive(canonical))
        } else {
            debug!("Skipping unsupported root {}", entry.display());
            None
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Whether a (normalized) path lies inside this root
    fn covers(&self, path: &Path) -> bool {
        match self {
            Self::Directory(dir) => path.starts_with(dir),
            Self::Archive(archive) => path == archive,
        }
    }
}

/// Resolve entries into distinct roots, skipping those missing on disk
pub fn to_roots<'a, I>(entries: I) -> Vec<RootHandle>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter_map(|entry| RootHandle::from_entry(entry))
        .filter(|root| seen.insert(root.clone()))
        .collect()
}

/// A search scope restricted to a fixed set of roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchScope {
    roots: Vec<RootHandle>,
}

impl SearchScope {
    pub fn new(roots: Vec<RootHandle>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[RootHandle] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether `path` is inside one of the scope's roots
    pub fn contains(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.roots.iter().any(|root| root.covers(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_entry_classifies_roots() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("classes");
        let jar = temp.path().join("lib.jar");
        fs::create_dir(&dir).unwrap();
        fs::write(&jar, b"jar").unwrap();

        let dir_root = RootHandle::from_entry(&dir).unwrap();
        let jar_root = RootHandle::from_entry(&jar).unwrap();

        assert!(!dir_root.is_archive());
        assert!(jar_root.is_archive());
        assert!(RootHandle::from_entry(&temp.path().join("missing.jar")).is_none());
    }

    #[test]
    fn test_to_roots_deduplicates_and_skips_missing() {
        let temp = TempDir::new().unwrap();
        let jar = temp.path().join("lib.jar");
        fs::write(&jar, b"jar").unwrap();

        let entries = vec![
            jar.clone(),
            temp.path().join("missing.jar"),
            temp.path().join(".").join("lib.jar"),
        ];
        let roots = to_roots(&entries);

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path(), normalize_path(&jar));
    }

    #[test]
    fn test_scope_contains() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let jar = temp.path().join("lib.jar");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("Main.kt"), "fun main() {}").unwrap();
        fs::write(&jar, b"jar").unwrap();

        let scope = SearchScope::new(to_roots(&vec![src.clone(), jar.clone()]));

        assert!(scope.contains(&src.join("Main.kt")));
        assert!(scope.contains(&jar));
        assert!(!scope.contains(&temp.path().join("other.kt")));
        assert!(!SearchScope::default().contains(&jar));
    }
}
