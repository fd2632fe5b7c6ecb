//! Per-run working trees and their cleanup.
//!
//! A [`WorkingTree`] owns a uniquely named run directory under the configured
//! work root:
//!
//! ```text
//! <work_root>/<name>-<identity>-<random>/   run directory
//! ├── <name>/                              tree root (the snapshot)
//! │   └── dist/                            staging directory
//! ├── extract/                             archive extraction scratch
//! └── <name>*.zip                          transient archive
//! ```
//!
//! The run directory is removed by [`WorkingTree::cleanup`], or on drop if the
//! owning task never reaches cleanup (panic, dropped future).

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::domain::SourceReference;
use crate::metrics::METRICS;

/// Name of the staging directory inside the tree root.
pub const STAGING_DIR: &str = "dist";

/// Name of the version-control metadata directory.
pub const VCS_DIR: &str = ".git";

/// Ephemeral filesystem scope for a single pipeline run.
#[derive(Debug)]
pub struct WorkingTree {
    dir: TempDir,
    name: String,
}

impl WorkingTree {
    /// Create a fresh run directory for `source` under `work_root`.
    ///
    /// The directory name is `<name>-<identity>-<random>` so concurrent or
    /// repeated runs of the same reference never share a path.
    pub fn create(work_root: &Path, source: &SourceReference) -> std::io::Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", source.name, source.identity))
            .tempdir_in(work_root)?;
        debug!(path = %dir.path().display(), "created working tree");
        Ok(Self {
            dir,
            name: source.name.clone(),
        })
    }

    /// The run directory.
    pub fn run_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Where the snapshot lives once fetched.
    pub fn root(&self) -> PathBuf {
        self.dir.path().join(&self.name)
    }

    /// The staging directory inside the snapshot.
    pub fn staging_dir(&self) -> PathBuf {
        self.root().join(STAGING_DIR)
    }

    /// Scratch directory for archive extraction.
    pub fn extract_dir(&self) -> PathBuf {
        self.dir.path().join("extract")
    }

    /// Canonical short name of the snapshot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the run directory.
    ///
    /// Best effort: failures are logged and counted, never returned, so a
    /// cleanup problem cannot mask the outcome of the run.
    pub fn cleanup(self) -> CleanupReport {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                debug!(path = %path.display(), "removed working tree");
                CleanupReport { path, error: None }
            }
            Err(e) => {
                METRICS.inc_cleanup_failures();
                warn!(path = %path.display(), error = %e, "failed to remove working tree");
                CleanupReport {
                    path,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// What happened during cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub path: PathBuf,
    pub error: Option<String>,
}

impl CleanupReport {
    pub fn removed(&self) -> bool {
        self.error.is_none()
    }
}
