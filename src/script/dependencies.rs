//! Dependency sets resolved for a single script
//!
//! A dependency set is an immutable pair of path lists: the classpath entries a
//! script compiles against and the source roots used for navigation.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Classpath and source roots resolved for one script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencySet {
    classpath: Vec<PathBuf>,
    sources: Vec<PathBuf>,
}

impl DependencySet {
    /// The set with no classpath entries and no sources
    pub const EMPTY: DependencySet = DependencySet {
        classpath: Vec::new(),
        sources: Vec::new(),
    };

    /// Build a dependency set, dropping repeated paths (first occurrence wins)
    pub fn new<C, S>(classpath: C, sources: S) -> Self
    where
        C: IntoIterator,
        C::Item: Into<PathBuf>,
        S: IntoIterator,
        S::Item: Into<PathBuf>,
    {
        Self {
            classpath: distinct_paths(classpath.into_iter().map(Into::into)),
            sources: distinct_paths(sources.into_iter().map(Into::into)),
        }
    }

    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.classpath.is_empty() && self.sources.is_empty()
    }

    /// Compare two sets the way the cache decides whether a resolution changed anything
    ///
    /// Classpath order matters (it is the lookup order), source order does not:
    /// resolvers routinely report the same sources in a different order.
    pub fn matches(&self, other: &DependencySet) -> bool {
        let same_classpath = self.classpath.len() == other.classpath.len()
            && self
                .classpath
                .iter()
                .zip(&other.classpath)
                .all(|(a, b)| same_path(a, b));

        same_classpath && path_set(&self.sources) == path_set(&other.sources)
    }
}

/// Normalize a path for identity comparisons
///
/// Existing paths are canonicalized (symlinks resolved). Paths that do not
/// exist are cleaned lexically so that `a/./b/../c` and `a/c` compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Cache key for a script: its normalized path as a string
pub fn artifact_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().into_owned()
}

/// Whether two paths refer to the same location
pub fn same_path(a: &Path, b: &Path) -> bool {
    a == b || normalize_path(a) == normalize_path(b)
}

/// Deduplicate paths by their normalized form, keeping first-seen order
pub fn distinct_paths<I>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(normalize_path(path)))
        .collect()
}

fn path_set(paths: &[PathBuf]) -> HashSet<PathBuf> {
    paths.iter().map(|p| normalize_path(p)).collect()
}
