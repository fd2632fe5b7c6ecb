//! Zipball download and extraction.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::SourceFetcher;
use crate::config::{FetchStrategy, DEFAULT_HOSTING_HOST};
use crate::domain::SourceReference;
use crate::error::{FetchError, RequestError};
use crate::workspace::WorkingTree;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Fetches snapshots as zip archives from the hosting API.
pub struct ArchiveFetcher {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    host: String,
}

impl ArchiveFetcher {
    /// Create a fetcher against `api_url`, authenticating with `token` if set.
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            token,
            host: DEFAULT_HOSTING_HOST.to_string(),
        }
    }

    /// Serve references hosted on `host` instead of `github.com`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Stream the archive at `url` into the file at `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let network = |reason: String| FetchError::Network {
            url: url.to_string(),
            reason,
        };
        let io = |source: std::io::Error| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(USER_AGENT, concat!("permadeploy/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let mut response = request.send().await.map_err(|e| network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(network(format!("HTTP {status}")));
        }

        let mut out = tokio::fs::File::create(dest).await.map_err(io)?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| network(e.to_string()))? {
            out.write_all(&chunk).await.map_err(io)?;
            written += chunk.len() as u64;
        }
        out.flush().await.map_err(io)?;

        Ok(written)
    }
}

#[async_trait]
impl SourceFetcher for ArchiveFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Archive
    }

    /// Only references on the API's own host; anything else would resolve to
    /// a same-named repository there.
    fn accepts(&self, source: &SourceReference) -> Result<(), RequestError> {
        let host = source.host.trim_start_matches("www.");
        if host.eq_ignore_ascii_case(&self.host) {
            return Ok(());
        }
        Err(RequestError::UnsupportedHost {
            host: if source.host.is_empty() {
                "(local path)".to_string()
            } else {
                source.host.clone()
            },
            expected: self.host.clone(),
        })
    }

    async fn fetch(
        &self,
        source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError> {
        self.accepts(source)?;
        let url = source.archive_url(&self.api_url);
        info!(url = %url, "downloading repository archive");

        // Removed when dropped, whichever way this function exits.
        let archive = tempfile::Builder::new()
            .prefix(&format!("{}-", source.name))
            .suffix(".zip")
            .tempfile_in(tree.run_dir())
            .map_err(|source| FetchError::Io {
                path: tree.run_dir().to_path_buf(),
                source,
            })?;

        let bytes = self.download(&url, archive.path()).await?;
        debug!(bytes, path = %archive.path().display(), "archive downloaded");

        let extract_dir = tree.extract_dir();
        let dest = tree.root();
        let name = source.name.clone();

        tokio::task::spawn_blocking(move || -> Result<PathBuf, FetchError> {
            let extracted = extract_zip(archive.path(), &extract_dir);
            drop(archive);
            extracted?;

            let top = locate_extracted_root(&extract_dir, &name)?;
            std::fs::rename(&top, &dest).map_err(|source| FetchError::Io {
                path: top.clone(),
                source,
            })?;
            Ok(dest)
        })
        .await
        .map_err(|e| FetchError::ExtractFailed(format!("extraction task failed: {e}")))?
    }
}

/// Extract the zip archive at `archive` into `dest`.
///
/// Entries whose paths would escape `dest` are skipped.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, FetchError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| FetchError::Io { path, source }
    };

    std::fs::create_dir_all(dest).map_err(io_err(dest))?;

    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| FetchError::ExtractFailed(format!("not a zip archive: {e}")))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| FetchError::ExtractFailed(format!("failed to read entry {i}: {e}")))?;

        let Some(relative) = entry.enclosed_name() else {
            debug!(entry = %entry.name(), "skipping zip entry with unsafe path");
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(io_err(&outpath))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut outfile = File::create(&outpath).map_err(io_err(&outpath))?;
        std::io::copy(&mut entry, &mut outfile).map_err(io_err(&outpath))?;
        written += 1;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(written)
}

/// Find the single top-level directory in `dir` whose name contains `name`.
///
/// Hosting platforms name the archive root `<owner>-<name>-<sha>`, so the match
/// is a case-insensitive substring test. Ambiguous matches are an error rather
/// than a guess.
pub fn locate_extracted_root(dir: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let entries = std::fs::read_dir(dir).map_err(|source| FetchError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut directories = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| FetchError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            directories.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    if directories.is_empty() {
        return Err(FetchError::ExtractFailed(
            "archive contained no directories".to_string(),
        ));
    }

    let needle = name.to_lowercase();
    let mut candidates: Vec<&String> = directories
        .iter()
        .filter(|d| d.to_lowercase().contains(&needle))
        .collect();

    match candidates.len() {
        0 => Err(FetchError::ExtractFailed(format!(
            "no extracted directory matches {name} (found: {})",
            directories.join(", ")
        ))),
        1 => Ok(dir.join(candidates.remove(0))),
        n => {
            candidates.sort();
            Err(FetchError::ExtractFailed(format!(
                "{n} extracted directories match {name}: {}",
                candidates
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}
