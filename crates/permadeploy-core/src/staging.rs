//! Moves publishable output into the staging directory.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::build::BuildOutput;
use crate::error::StageError;
use crate::workspace::{STAGING_DIR, VCS_DIR};

/// Result of staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifacts {
    /// The staging directory.
    pub dir: PathBuf,

    /// Names of the moved entries, sorted.
    pub moved: Vec<String>,
}

/// Moves build output (or the filtered source tree) into `<tree root>/dist`.
pub struct ArtifactStager;

impl ArtifactStager {
    /// Stage `output` under `tree_root`.
    ///
    /// - Build path: every entry of the output directory is moved into the
    ///   staging directory, which is emptied first so it holds exactly the
    ///   build output.
    /// - Passthrough path: every top-level entry of the tree except the
    ///   staging directory and `.git` is moved in.
    ///
    /// Entries are renamed, never copied.
    pub async fn stage(
        tree_root: &Path,
        output: &BuildOutput,
    ) -> Result<StagedArtifacts, StageError> {
        let staging = tree_root.join(STAGING_DIR);
        let source = output.dir();
        let passthrough = source == tree_root;

        if source == staging {
            // The build already wrote into the staging directory.
            let moved = list_entries(&staging, &[]).await?;
            return Ok(StagedArtifacts {
                dir: staging,
                moved,
            });
        }

        if !passthrough && tokio::fs::try_exists(&staging).await.map_err(io(&staging))? {
            tokio::fs::remove_dir_all(&staging).await.map_err(io(&staging))?;
        }
        tokio::fs::create_dir_all(&staging).await.map_err(io(&staging))?;

        let excluded: &[&str] = if passthrough {
            &[STAGING_DIR, VCS_DIR]
        } else {
            &[]
        };
        let names = list_entries(source, excluded).await?;

        for name in &names {
            let from = source.join(name);
            let to = staging.join(name);
            debug!(from = %from.display(), to = %to.display(), "staging entry");
            tokio::fs::rename(&from, &to).await.map_err(io(&from))?;
        }

        Ok(StagedArtifacts {
            dir: staging,
            moved: names,
        })
    }
}

async fn list_entries(dir: &Path, excluded: &[&str]) -> Result<Vec<String>, StageError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io(dir))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io(dir))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !excluded.contains(&name.as_str()) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StageError {
    let path = path.to_path_buf();
    move |source| StageError::Io { path, source }
}
