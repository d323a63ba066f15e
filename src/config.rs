use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::script::{AnnotationResolver, CommandResolver, ResolverKind, ScriptDefinition};

/// File name looked up by configuration discovery
pub const CONFIG_FILE_NAME: &str = "scriptdeps.toml";

/// Complete scriptdeps configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDepsConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default = "default_definitions")]
    pub definitions: Vec<DefinitionConfig>,
}

impl Default for ScriptDepsConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig::default(),
            cache: CacheConfig::default(),
            resolution: ResolutionConfig::default(),
            definitions: default_definitions(),
        }
    }
}

/// Which files belong to the workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directories (relative to the workspace root) whose scripts are tracked
    #[serde(default = "default_content_roots")]
    pub content_roots: Vec<PathBuf>,

    /// Directory names never treated as workspace content
    #[serde(default = "default_metadata_dirs")]
    pub metadata_dirs: Vec<String>,

    /// Accept changes anywhere in the workspace and notify inline
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            content_roots: default_content_roots(),
            metadata_dirs: default_metadata_dirs(),
            test_mode: false,
        }
    }
}

/// Disk hint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hint directory (relative to the workspace root unless absolute)
    #[serde(default = "default_hint_dir")]
    pub hint_dir: String,

    /// Persist resolved dependencies for warm starts
    #[serde(default = "default_true")]
    pub hints: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hint_dir: default_hint_dir(),
            hints: true,
        }
    }
}

/// Background resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Number of resolution workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long `watch` groups file events into one batch
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            watch_debounce: default_watch_debounce(),
        }
    }
}

/// Resolver kind of a script definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// `#DEPS` directives in the script, resolved inline
    Annotations,
    /// External command printing JSON, resolved in the background
    Command,
}

/// One `[[definitions]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionConfig {
    pub name: String,

    /// Glob matched against the script's file name
    pub pattern: String,

    pub kind: DefinitionKind,

    /// Program and arguments; the script path is appended
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

fn default_content_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_metadata_dirs() -> Vec<String> {
    [".git", ".idea", ".scriptdeps", "target"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_hint_dir() -> String {
    ".scriptdeps/hints".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_watch_debounce() -> String {
    "200ms".to_string()
}

fn default_true() -> bool {
    true
}

fn default_definitions() -> Vec<DefinitionConfig> {
    vec![DefinitionConfig {
        name: "kotlin-script".to_string(),
        pattern: "*.kts".to_string(),
        kind: DefinitionKind::Annotations,
        command: Vec::new(),
        timeout: None,
        environment: BTreeMap::new(),
    }]
}

impl ScriptDepsConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ScriptDepsConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Example configuration as TOML string
    pub fn example() -> Result<String> {
        let config = ScriptDepsConfig {
            definitions: vec![
                DefinitionConfig {
                    name: "kotlin-script".to_string(),
                    pattern: "*.main.kts".to_string(),
                    kind: DefinitionKind::Command,
                    command: vec!["./tools/resolve-deps".to_string(), "--json".to_string()],
                    timeout: Some("2m".to_string()),
                    environment: BTreeMap::from([("profile".to_string(), "ci".to_string())]),
                },
                default_definitions().remove(0),
            ],
            ..Default::default()
        };

        toml::to_string_pretty(&config).context("Failed to serialize example config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.workers == 0 {
            anyhow::bail!("resolution.workers must be at least 1");
        }

        parse_duration(&self.resolution.watch_debounce)
            .context("resolution.watch_debounce is invalid")?;

        if self.cache.hint_dir.is_empty() {
            anyhow::bail!("cache.hint_dir must be set");
        }

        for definition in &self.definitions {
            if definition.name.is_empty() {
                anyhow::bail!("definitions.name must be set");
            }

            glob::Pattern::new(&definition.pattern).with_context(|| {
                format!(
                    "definitions.pattern is not a valid glob: {}",
                    definition.pattern
                )
            })?;

            if definition.kind == DefinitionKind::Command && definition.command.is_empty() {
                anyhow::bail!(
                    "definitions.command must be set for command definition '{}'",
                    definition.name
                );
            }

            if let Some(timeout) = &definition.timeout {
                parse_duration(timeout).with_context(|| {
                    format!("definitions.timeout is invalid for '{}'", definition.name)
                })?;
            }
        }

        Ok(())
    }

    pub fn watch_debounce(&self) -> Result<Duration> {
        parse_duration(&self.resolution.watch_debounce)
    }

    /// Hint directory resolved against the workspace root
    pub fn hint_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.cache.hint_dir)
    }

    /// Build the script definitions, in declaration order
    pub fn script_definitions(&self) -> Result<Vec<ScriptDefinition>> {
        self.definitions
            .iter()
            .map(|definition| {
                let resolver = match definition.kind {
                    DefinitionKind::Annotations => ResolverKind::Sync(Arc::new(AnnotationResolver)),
                    DefinitionKind::Command => {
                        let timeout = definition
                            .timeout
                            .as_deref()
                            .map(parse_duration)
                            .transpose()?;
                        let resolver =
                            CommandResolver::new(&definition.command)?.with_timeout(timeout);
                        ResolverKind::Async(Arc::new(resolver))
                    }
                };

                Ok(
                    ScriptDefinition::new(definition.name.clone(), &definition.pattern, resolver)?
                        .with_environment(definition.environment.clone()),
                )
            })
            .collect()
    }
}

/// Parse duration string (e.g., "200ms", "30s", "10m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("Missing duration unit: {}. Use: ms, s, m, h", s))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 3600)),
        _ => Err(anyhow!("Invalid duration unit: {}. Use: ms, s, m, h", unit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScriptDepsConfig::default();
        assert_eq!(config.cache.hint_dir, ".scriptdeps/hints");
        assert!(config.cache.hints);
        assert_eq!(config.resolution.workers, 1);
        assert_eq!(config.definitions.len(), 1);
        assert_eq!(config.definitions[0].kind, DefinitionKind::Annotations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: ScriptDepsConfig = toml::from_str("").unwrap();
        assert_eq!(config.workspace.content_roots, vec![PathBuf::from(".")]);
        assert!(config
            .workspace
            .metadata_dirs
            .contains(&".git".to_string()));
        assert_eq!(config.definitions[0].pattern, "*.kts");
    }

    #[test]
    fn test_parse_definitions() {
        let config: ScriptDepsConfig = toml::from_str(
            r#"
[resolution]
workers = 2
watch_debounce = "1s"

[[definitions]]
name = "gradle"
pattern = "*.gradle.kts"
kind = "command"
command = ["resolve-gradle", "--offline"]
timeout = "30s"
environment = { profile = "ci" }

[[definitions]]
name = "plain"
pattern = "*.kts"
kind = "annotations"
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.watch_debounce().unwrap(), Duration::from_secs(1));

        let definitions = config.script_definitions().unwrap();
        assert_eq!(definitions.len(), 2);
        assert!(definitions[0].is_async());
        assert!(!definitions[1].is_async());
        assert_eq!(
            definitions[0].environment().get("profile"),
            Some(&"ci".to_string())
        );
        assert!(definitions[0].matches(Path::new("/ws/build.gradle.kts")));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = ScriptDepsConfig::default();
        config.resolution.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_command_without_argv() {
        let mut config = ScriptDepsConfig::default();
        config.definitions[0].kind = DefinitionKind::Command;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_duration() {
        let mut config = ScriptDepsConfig::default();
        config.resolution.watch_debounce = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips() {
        let example = ScriptDepsConfig::example().unwrap();
        let config: ScriptDepsConfig = toml::from_str(&example).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.definitions.len(), 2);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
    }
}
