//! Resolver contracts and script definitions
//!
//! A script definition ties a file pattern to the resolver that computes
//! dependencies for matching scripts. Resolvers come in two kinds:
//!
//! - synchronous: called inline, the caller waits for the answer
//! - asynchronous: run on the background queue, the answer is applied later

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{error, info, warn};

use super::dependencies::DependencySet;
use super::tracker::CancellationToken;

/// Environment passed to resolvers (definition-specific key/value pairs)
pub type Environment = BTreeMap<String, String>;

/// Reasons a resolver could not produce a dependency set
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Resolution failed: {0}")]
    Failed(String),

    #[error("Resolution was cancelled")]
    Cancelled,

    #[error("I/O error during resolution: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resolver output: {0}")]
    InvalidOutput(String),
}

/// Severity of a resolver report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

/// A diagnostic attached to a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }
}

/// Outcome of an asynchronous resolution
///
/// `dependencies: None` means the resolution failed; only the reports are used.
#[derive(Debug, Clone, Default)]
pub struct ResolutionResult {
    pub dependencies: Option<DependencySet>,
    pub reports: Vec<Diagnostic>,
}

impl ResolutionResult {
    pub fn success(dependencies: DependencySet) -> Self {
        Self {
            dependencies: Some(dependencies),
            reports: Vec::new(),
        }
    }

    pub fn failure(reports: Vec<Diagnostic>) -> Self {
        Self {
            dependencies: None,
            reports,
        }
    }

    pub fn with_reports(mut self, reports: Vec<Diagnostic>) -> Self {
        self.reports.extend(reports);
        self
    }
}

/// Script text handed to resolvers
#[derive(Debug, Clone)]
pub struct ScriptContent {
    pub path: PathBuf,
    pub text: String,
}

impl ScriptContent {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    /// Directory relative entries are resolved against
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Resolver invoked inline on the caller's thread
pub trait SyncResolver: Send + Sync {
    fn resolve(
        &self,
        script: &ScriptContent,
        environment: &Environment,
    ) -> Result<DependencySet, ResolutionError>;
}

/// Resolver run on the background queue
///
/// Implementations should check `cancel` periodically and give up early when
/// it is set; the result of a cancelled request is discarded either way.
pub trait AsyncResolver: Send + Sync {
    fn resolve(
        &self,
        script: &ScriptContent,
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> ResolutionResult;
}

/// How a definition resolves its scripts
#[derive(Clone)]
pub enum ResolverKind {
    Sync(Arc<dyn SyncResolver>),
    Async(Arc<dyn AsyncResolver>),
}

impl fmt::Debug for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync"),
            Self::Async(_) => f.write_str("Async"),
        }
    }
}

/// Binds a file-name pattern to a resolver
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    name: String,
    pattern: glob::Pattern,
    resolver: ResolverKind,
    environment: Environment,
}

impl ScriptDefinition {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        resolver: ResolverKind,
    ) -> anyhow::Result<Self> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| anyhow::anyhow!("Invalid script pattern '{}': {}", pattern, e))?;

        Ok(Self {
            name: name.into(),
            pattern,
            resolver,
            environment: Environment::new(),
        })
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolver(&self) -> &ResolverKind {
        &self.resolver
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn is_async(&self) -> bool {
        matches!(self.resolver, ResolverKind::Async(_))
    }

    /// Whether this definition applies to `path` (matched on the file name)
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.matches(name))
    }
}

/// Ordered set of script definitions; the first match wins
#[derive(Debug, Default)]
pub struct DefinitionProvider {
    definitions: RwLock<Vec<ScriptDefinition>>,
}

impl DefinitionProvider {
    pub fn new(definitions: Vec<ScriptDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    pub fn find(&self, path: &Path) -> Option<ScriptDefinition> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|definition| definition.matches(path))
            .cloned()
    }

    pub fn replace(&self, definitions: Vec<ScriptDefinition>) {
        *self
            .definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = definitions;
    }

    pub fn len(&self) -> usize {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives diagnostics produced by asynchronous resolutions
pub trait ReportSink: Send + Sync {
    fn attach_reports(&self, script: &Path, reports: &[Diagnostic]);
}

/// Report sink that writes diagnostics to the log
#[derive(Debug, Default)]
pub struct LoggingReportSink;

impl ReportSink for LoggingReportSink {
    fn attach_reports(&self, script: &Path, reports: &[Diagnostic]) {
        for report in reports {
            let line = report.line.map(|l| format!(":{}", l)).unwrap_or_default();
            match report.severity {
                Severity::Error => error!("{}{}: {}", script.display(), line, report.message),
                Severity::Warning => warn!("{}{}: {}", script.display(), line, report.message),
                Severity::Info | Severity::Debug => {
                    info!("{}{}: {}", script.display(), line, report.message)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(DependencySet);

    impl SyncResolver for FixedResolver {
        fn resolve(
            &self,
            _script: &ScriptContent,
            _environment: &Environment,
        ) -> Result<DependencySet, ResolutionError> {
            Ok(self.0.clone())
        }
    }

    fn definition(name: &str, pattern: &str) -> ScriptDefinition {
        ScriptDefinition::new(
            name,
            pattern,
            ResolverKind::Sync(Arc::new(FixedResolver(DependencySet::EMPTY))),
        )
        .unwrap()
    }

    #[test]
    fn test_definition_matches_file_name() {
        let def = definition("gradle", "*.gradle.kts");

        assert!(def.matches(Path::new("/ws/build.gradle.kts")));
        assert!(!def.matches(Path::new("/ws/main.kts")));
        assert!(!def.is_async());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = ScriptDefinition::new(
            "broken",
            "[",
            ResolverKind::Sync(Arc::new(FixedResolver(DependencySet::EMPTY))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_first_match_wins() {
        let provider = DefinitionProvider::new(vec![
            definition("gradle", "*.gradle.kts"),
            definition("any", "*.kts"),
        ]);

        let found = provider.find(Path::new("/ws/settings.gradle.kts")).unwrap();
        assert_eq!(found.name(), "gradle");

        let found = provider.find(Path::new("/ws/tool.kts")).unwrap();
        assert_eq!(found.name(), "any");

        assert!(provider.find(Path::new("/ws/Main.kt")).is_none());
    }

    #[test]
    fn test_provider_replace() {
        let provider = DefinitionProvider::new(vec![definition("any", "*.kts")]);
        provider.replace(Vec::new());

        assert!(provider.is_empty());
        assert!(provider.find(Path::new("/ws/tool.kts")).is_none());
    }

    #[test]
    fn test_diagnostic_parses_from_json() {
        let report: Diagnostic =
            serde_json::from_str(r#"{"severity":"warning","message":"slow","line":3}"#).unwrap();

        assert_eq!(report.severity, Severity::Warning);
        assert_eq!(report.line, Some(3));
    }

    #[test]
    fn test_resolution_result_constructors() {
        let ok = ResolutionResult::success(DependencySet::new(["/a.jar"], Vec::<PathBuf>::new()))
            .with_reports(vec![Diagnostic::warning("deprecated")]);
        assert!(ok.dependencies.is_some());
        assert_eq!(ok.reports.len(), 1);

        let failed = ResolutionResult::failure(vec![Diagnostic::error("boom")]);
        assert!(failed.dependencies.is_none());
    }
}
