//! `git clone` fetcher.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use super::SourceFetcher;
use crate::config::FetchStrategy;
use crate::domain::SourceReference;
use crate::error::{FetchError, ProcessError};
use crate::process::{tail, CommandSpec, ProcessRunner};
use crate::workspace::WorkingTree;

const STDERR_TAIL: usize = 4096;

/// Fetches snapshots with a full `git clone`.
#[derive(Debug, Default)]
pub struct CloneFetcher {
    timeout_secs: u64,
}

impl CloneFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the clone to `secs` seconds (0 disables the ceiling).
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[async_trait]
impl SourceFetcher for CloneFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Clone
    }

    async fn fetch(
        &self,
        source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError> {
        let dest = tree.root();
        info!(url = %source.clone_url, dest = %dest.display(), "cloning repository");

        let spec = CommandSpec::new(
            "git_clone",
            vec![
                "git".to_string(),
                "clone".to_string(),
                "--quiet".to_string(),
                source.clone_url.clone(),
                dest.to_string_lossy().to_string(),
            ],
            tree.run_dir(),
        )
        .with_env("GIT_TERMINAL_PROMPT", "0")
        .with_timeout(self.timeout_secs);

        let output = ProcessRunner::run(&spec).await.map_err(|e| match e {
            ProcessError::TimedOut { secs, .. } => FetchError::Network {
                url: source.clone_url.clone(),
                reason: format!("clone timed out after {secs} seconds"),
            },
            other => FetchError::Clone {
                exit_code: -1,
                stderr: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(FetchError::Clone {
                exit_code: output.exit_code,
                stderr: tail(output.stderr.trim(), STDERR_TAIL).to_string(),
            });
        }

        Ok(dest)
    }
}
