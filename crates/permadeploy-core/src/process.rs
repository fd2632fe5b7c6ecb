//! Subprocess execution with captured output and an optional ceiling.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProcessError;

/// A command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Human-readable name used in logs and errors.
    pub name: String,

    /// Command to execute (first element is executable).
    pub argv: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,

    /// Extra environment variables.
    pub envs: Vec<(String, String)>,

    /// Timeout in seconds, 0 disables it.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>, cwd: &Path) -> Self {
        Self {
            name: name.into(),
            argv,
            cwd: cwd.to_path_buf(),
            envs: Vec::new(),
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs [`CommandSpec`]s.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// On unix the child leads its own process group. If the timeout expires
    /// the whole group is killed, so grandchildren spawned through `sh -c`
    /// cannot keep writing into the working tree.
    pub async fn run(spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let start = Instant::now();

        let Some((exe, args)) = spec.argv.split_first() else {
            return Err(ProcessError::EmptyCommand {
                name: spec.name.clone(),
            });
        };

        debug!(name = %spec.name, exe = %exe, cwd = %spec.cwd.display(), "spawning process");

        let mut command = Command::new(exe);
        command
            .args(args)
            .current_dir(&spec.cwd)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            name: spec.name.clone(),
            source,
        })?;
        let pid = child.id();

        let output = if spec.timeout_secs > 0 {
            match tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(output) => output,
                Err(_) => {
                    if let Some(pid) = pid {
                        kill_process_group(pid);
                    }
                    return Err(ProcessError::TimedOut {
                        name: spec.name.clone(),
                        secs: spec.timeout_secs,
                    });
                }
            }
        } else {
            child.wait_with_output().await
        }
        .map_err(|source| ProcessError::Spawn {
            name: spec.name.clone(),
            source,
        })?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            warn!(pid, error = ?e, "SIGKILL to process group failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Keep the last `max` bytes of `text`, on a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
