use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// scriptdeps - Script dependency cache
///
/// Resolves the classpath and sources of scripts, keeps them cached with
/// warm-start hints, and refreshes them as files change.
#[derive(Parser, Debug)]
#[command(name = "scriptdeps")]
#[command(author = "Tuist Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Script dependency cache", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Common configuration arguments shared across commands
#[derive(Parser, Debug, Clone)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, global = true, env = "SCRIPTDEPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disk hint directory
    #[arg(long, global = true, env = "SCRIPTDEPS_HINT_DIR")]
    pub hint_dir: Option<PathBuf>,

    /// Do not read or write disk hints
    #[arg(long, global = true)]
    pub no_hints: bool,

    /// Number of background resolution workers
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve the dependencies of scripts
    Resolve(ResolveArgs),

    /// Print the aggregate roots of scripts
    Roots(RootsArgs),

    /// Watch a workspace and refresh scripts as they change
    Watch(WatchArgs),

    /// Manage disk hints
    Hints(HintsArgs),

    /// Generate or validate configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Script files or directories to scan
    #[arg(required = true)]
    pub scripts: Vec<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Max time to wait for background resolutions
    #[arg(long, default_value = "5m")]
    pub timeout: String,
}

#[derive(Parser, Debug)]
pub struct RootsArgs {
    /// Script files or directories to scan
    #[arg(required = true)]
    pub scripts: Vec<PathBuf>,

    /// Print source roots instead of classpath roots
    #[arg(long)]
    pub sources: bool,

    /// Max time to wait for background resolutions
    #[arg(long, default_value = "5m")]
    pub timeout: String,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Directory to watch (defaults to the workspace root)
    pub dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct HintsArgs {
    #[command(subcommand)]
    pub command: HintsCommands,
}

#[derive(Subcommand, Debug)]
pub enum HintsCommands {
    /// Remove every stored hint
    Clean,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print an example configuration file
    Generate,

    /// Validate a configuration file (defaults to the discovered one)
    Validate {
        /// Config file to validate
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::parse_from(["scriptdeps", "resolve", "a.kts", "b.kts", "--json"]);
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.scripts.len(), 2);
                assert!(args.json);
                assert_eq!(args.timeout, "5m");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["scriptdeps", "roots", "--sources", "a.kts", "--no-hints"]);
        assert!(cli.common.no_hints);
        assert!(matches!(cli.command, Commands::Roots(RootsArgs { sources: true, .. })));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = Cli::parse_from(["scriptdeps", "config", "validate", "ci.toml"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                command: ConfigCommands::Validate { path },
            }) => assert_eq!(path, Some(PathBuf::from("ci.toml"))),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_requires_scripts() {
        assert!(Cli::try_parse_from(["scriptdeps", "resolve"]).is_err());
    }
}
