//! External command resolver
//!
//! Runs a configured command with the script path appended and parses the
//! dependency set from its standard output:
//!
//! ```json
//! {"classpath": ["libs/a.jar"], "sources": ["src"], "reports": [{"severity": "warning", "message": "..."}]}
//! ```
//!
//! Relative paths are resolved against the script's directory. A non-zero exit
//! status is a failed resolution; stderr is reported as an error diagnostic.

use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

use super::dependencies::DependencySet;
use super::resolver::{
    AsyncResolver, Diagnostic, Environment, ResolutionError, ResolutionResult, ScriptContent,
};
use super::tracker::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Deserialize)]
struct CommandOutput {
    #[serde(default)]
    classpath: Vec<PathBuf>,
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    reports: Vec<Diagnostic>,
}

/// Asynchronous resolver backed by an external program
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandResolver {
    /// Build from an argv; the first element is the program
    pub fn new(argv: &[String]) -> anyhow::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Resolver command must not be empty"))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(
        &self,
        script: &ScriptContent,
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> Result<ResolutionResult, ResolutionError> {
        // Resolve the program from PATH, falling back to the name as given
        let program = which::which(&self.program).unwrap_or_else(|_| PathBuf::from(&self.program));

        // The child runs in the script's directory, so hand it an absolute path
        let script_path =
            std::path::absolute(&script.path).unwrap_or_else(|_| script.path.clone());
        let base = script_path.parent().unwrap_or(Path::new("")).to_path_buf();

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .arg(&script_path)
            .envs(environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if base.is_dir() {
            cmd.current_dir(&base);
        }

        debug!("Running resolver command: {:?}", cmd);
        let mut child = cmd.spawn()?;

        // Drain the pipes on separate threads so a chatty resolver cannot block on a full pipe
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = self.wait(&mut child, cancel)?;
        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        if !status.success() {
            let message = String::from_utf8_lossy(&stderr).trim().to_string();
            let message = if message.is_empty() {
                format!("Resolver exited with {}", status)
            } else {
                message
            };
            return Ok(ResolutionResult::failure(vec![Diagnostic::error(message)]));
        }

        let output: CommandOutput = serde_json::from_slice(&stdout)
            .map_err(|e| ResolutionError::InvalidOutput(e.to_string()))?;

        let absolute = |paths: Vec<PathBuf>| {
            paths
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { base.join(p) })
                .collect::<Vec<_>>()
        };

        Ok(ResolutionResult {
            dependencies: Some(DependencySet::new(
                absolute(output.classpath),
                absolute(output.sources),
            )),
            reports: output.reports,
        })
    }

    fn wait(&self, child: &mut Child, cancel: &CancellationToken) -> Result<ExitStatus, ResolutionError> {
        let start = Instant::now();

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }

            if cancel.is_cancelled() {
                kill(child);
                return Err(ResolutionError::Cancelled);
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    kill(child);
                    return Err(ResolutionError::Failed(format!(
                        "Resolver timed out after {}ms",
                        timeout.as_millis()
                    )));
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl AsyncResolver for CommandResolver {
    fn resolve(
        &self,
        script: &ScriptContent,
        environment: &Environment,
        cancel: &CancellationToken,
    ) -> ResolutionResult {
        match self.run(script, environment, cancel) {
            Ok(result) => result,
            Err(e) => ResolutionResult::failure(vec![Diagnostic::error(e.to_string())]),
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    // Reap the process
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
