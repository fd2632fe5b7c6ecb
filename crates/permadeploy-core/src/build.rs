//! Build detection and execution.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BuildError, ProcessError};
use crate::process::{tail, CommandSpec, ProcessRunner};

/// Manifest whose presence at the tree root selects the build path.
pub const BUILD_MANIFEST: &str = "package.json";

const STDERR_TAIL: usize = 4096;

/// Where publishable output lives after the build step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutput {
    /// A build ran and wrote its output to this directory.
    Built { dir: PathBuf, duration_ms: u64 },
    /// No manifest; the tree root is already the output.
    PassedThrough { dir: PathBuf },
}

impl BuildOutput {
    pub fn dir(&self) -> &Path {
        match self {
            BuildOutput::Built { dir, .. } | BuildOutput::PassedThrough { dir } => dir,
        }
    }

    pub fn was_built(&self) -> bool {
        matches!(self, BuildOutput::Built { .. })
    }
}

/// Runs the build command when a manifest is present.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    command: Vec<String>,
    output_dir: String,
    timeout_secs: u64,
}

impl BuildRunner {
    pub fn new(command: Vec<String>, output_dir: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            timeout_secs,
        }
    }

    /// Whether `tree_root` carries a build manifest.
    pub fn detect(tree_root: &Path) -> bool {
        tree_root.join(BUILD_MANIFEST).is_file()
    }

    /// Build when a manifest is present, otherwise pass the tree through.
    pub async fn build_or_passthrough(&self, tree_root: &Path) -> Result<BuildOutput, BuildError> {
        if !Self::detect(tree_root) {
            debug!(root = %tree_root.display(), "no build manifest, passing through");
            return Ok(BuildOutput::PassedThrough {
                dir: tree_root.to_path_buf(),
            });
        }

        info!(command = ?self.command, "running build");
        let spec = CommandSpec::new("build", self.command.clone(), tree_root)
            .with_timeout(self.timeout_secs);

        let output = ProcessRunner::run(&spec).await.map_err(|e| match e {
            ProcessError::TimedOut { secs, .. } => BuildError::Timeout { secs },
            other => BuildError::Spawn(other.to_string()),
        })?;

        if !output.success() {
            return Err(BuildError::ManifestButBuildFailed {
                exit_code: output.exit_code,
                stderr: tail(output.stderr.trim(), STDERR_TAIL).to_string(),
            });
        }
        debug!(stdout = %tail(&output.stdout, STDERR_TAIL), "build stdout");

        let dir = tree_root.join(&self.output_dir);
        if !dir.is_dir() {
            return Err(BuildError::OutputMissing(dir));
        }

        Ok(BuildOutput::Built {
            dir,
            duration_ms: output.duration_ms,
        })
    }
}
