// Library interface for scriptdeps
// This allows integration tests and embedding hosts to use the cache directly

pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod logging;
pub mod script;

// Re-export commonly used types
pub use config::ScriptDepsConfig;
pub use config_discovery::{discover_config, load_config_with_discovery};
pub use script::{DependencySet, ScriptDependencyManager};
