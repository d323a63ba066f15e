//! KDL annotation resolver
//!
//! Reads dependency directives embedded in script comments:
//!
//! ```text
//! #DEPS classpath "libs/guava.jar" "libs/gson.jar"
//! #DEPS source "src/main/kotlin"
//! //DEPS classpath "build/classes" when="ci"
//! ```
//!
//! Relative paths are resolved against the script's directory. A directive
//! with a `when` property only applies if the definition environment has a
//! `profile` equal to its value.

use kdl::{KdlDocument, KdlNode};
use std::path::PathBuf;

use super::dependencies::DependencySet;
use super::resolver::{Environment, ResolutionError, ScriptContent, SyncResolver};

const PREFIXES: [&str; 2] = ["#DEPS", "//DEPS"];

/// Synchronous resolver driven by `#DEPS` directives
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotationResolver;

#[derive(Debug, Default)]
struct Directives {
    classpath: Vec<PathBuf>,
    sources: Vec<PathBuf>,
}

impl SyncResolver for AnnotationResolver {
    fn resolve(
        &self,
        script: &ScriptContent,
        environment: &Environment,
    ) -> Result<DependencySet, ResolutionError> {
        let directives = parse_directives(&script.text, environment)?;
        let base = script.base_dir();

        let absolute = |paths: Vec<PathBuf>| {
            paths
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { base.join(p) })
                .collect::<Vec<_>>()
        };

        Ok(DependencySet::new(
            absolute(directives.classpath),
            absolute(directives.sources),
        ))
    }
}

fn parse_directives(text: &str, environment: &Environment) -> Result<Directives, ResolutionError> {
    let kdl_lines: Vec<&str> = text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            PREFIXES
                .iter()
                .find_map(|prefix| trimmed.strip_prefix(prefix))
                .map(str::trim)
        })
        .collect();

    let mut directives = Directives::default();
    if kdl_lines.is_empty() {
        return Ok(directives);
    }

    let doc: KdlDocument = kdl_lines
        .join("\n")
        .parse()
        .map_err(|e| ResolutionError::Failed(format!("Invalid #DEPS syntax: {}", e)))?;

    for node in doc.nodes() {
        if !applies(node, environment) {
            continue;
        }
        match node.name().value() {
            "classpath" => directives.classpath.extend(positional_paths(node)?),
            "source" | "sources" => directives.sources.extend(positional_paths(node)?),
            other => {
                return Err(ResolutionError::Failed(format!(
                    "Unknown #DEPS directive: {}. Use: classpath, source",
                    other
                )))
            }
        }
    }

    Ok(directives)
}

fn applies(node: &KdlNode, environment: &Environment) -> bool {
    match node.get("when").and_then(|e| e.as_string()) {
        Some(profile) => environment.get("profile").map(String::as_str) == Some(profile),
        None => true,
    }
}

fn positional_paths(node: &KdlNode) -> Result<Vec<PathBuf>, ResolutionError> {
    let paths: Vec<PathBuf> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(PathBuf::from)
        .collect();

    if paths.is_empty() {
        return Err(ResolutionError::Failed(format!(
            "{} requires at least one path argument",
            node.name().value()
        )));
    }
    Ok(paths)
}
