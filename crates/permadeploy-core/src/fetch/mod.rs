//! Repository snapshot fetchers.
//!
//! A [`SourceFetcher`] turns a [`SourceReference`] into a directory at
//! [`WorkingTree::root`]. Two strategies exist: [`ArchiveFetcher`] downloads
//! and extracts the hosting platform's zipball, [`CloneFetcher`] runs
//! `git clone`.

pub mod archive;
pub mod clone;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DeployConfig, FetchStrategy};
use crate::domain::SourceReference;
use crate::error::{FetchError, RequestError};
use crate::workspace::WorkingTree;

pub use archive::{extract_zip, locate_extracted_root, ArchiveFetcher};
pub use clone::CloneFetcher;

/// Obtains a local snapshot of a repository.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Strategy implemented by this fetcher.
    fn strategy(&self) -> FetchStrategy;

    /// Whether this fetcher can serve `source` at all.
    fn accepts(&self, _source: &SourceReference) -> Result<(), RequestError> {
        Ok(())
    }

    /// Materialize `source` at `tree.root()` and return that path.
    async fn fetch(
        &self,
        source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PathBuf, FetchError>;
}

/// Build the fetcher selected by `config.fetch_strategy`.
pub fn fetcher_for(config: &DeployConfig) -> Arc<dyn SourceFetcher> {
    match config.fetch_strategy {
        FetchStrategy::Archive => Arc::new(
            ArchiveFetcher::new(config.api_url.clone(), config.hosting_token.clone())
                .with_host(config.hosting_host.clone()),
        ),
        FetchStrategy::Clone => Arc::new(CloneFetcher::new()),
    }
}
