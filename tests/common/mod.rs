// Common test utilities shared across acceptance tests
//
// Each test gets its own temporary workspace containing a `scriptdeps.toml`,
// so configuration discovery never escapes into the developer's directories
// and hints land inside the workspace. The directory is deleted on drop.

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Workspace with the default configuration
    pub fn new() -> Self {
        Self::with_config("")
    }

    pub fn with_config(config: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("scriptdeps.toml"), config)
            .expect("Failed to write config");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.temp_dir.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    #[allow(dead_code)]
    pub fn hint_count(&self) -> usize {
        let dir = self.path().join(".scriptdeps/hints");
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    /// `scriptdeps` running inside the workspace
    pub fn scriptdeps(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_scriptdeps"));
        cmd.current_dir(self.path())
            .env_remove("SCRIPTDEPS_CONFIG")
            .env_remove("SCRIPTDEPS_HINT_DIR")
            .env("SCRIPTDEPS_LOG_FORMAT", "compact")
            .env("RUST_LOG", "warn");
        cmd
    }
}
