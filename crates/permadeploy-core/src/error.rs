//! Error taxonomy for the deployment pipeline.
//!
//! Each stage owns its own error enum. [`PipelineError`] wraps them so the
//! orchestrator can report which stage failed, pick the message returned to
//! callers, and tell whether re-invoking the endpoint is worth trying.

use std::path::PathBuf;

use crate::domain::Stage;

/// Errors produced while parsing an incoming deployment request.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Repository URL is required")]
    MissingReference,

    #[error("Invalid repository URL: {0}")]
    InvalidReference(String),

    #[error("invalid request body: {0}")]
    MalformedBody(String),

    #[error("Unsupported repository host {host}: archive downloads are served by {expected}")]
    UnsupportedHost { host: String, expected: String },
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Subprocess plumbing errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("command {name} is empty")]
    EmptyCommand { name: String },

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} timed out after {secs} seconds")]
    TimedOut { name: String, secs: u64 },
}

/// Errors produced while obtaining a repository snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("repository not found: {url}")]
    NotFound { url: String },

    #[error(transparent)]
    Unsupported(#[from] RequestError),

    #[error("archive extraction failed: {0}")]
    ExtractFailed(String),

    #[error("git clone failed (exit {exit_code}): {stderr}")]
    Clone { exit_code: i32, stderr: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by the build step.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build failed (exit {exit_code}): {stderr}")]
    ManifestButBuildFailed { exit_code: i32, stderr: String },

    #[error("build timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("build succeeded but output directory {0} is missing")]
    OutputMissing(PathBuf),

    #[error("failed to start build: {0}")]
    Spawn(String),
}

/// Errors produced while moving artifacts into the staging directory.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to stage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by the publish step.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish command failed (exit {exit_code}): {stderr}")]
    CliFailure { exit_code: i32, stderr: String },

    #[error("publish output did not contain a bundle transaction id")]
    NoTransactionId,

    #[error("publish timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("failed to start publish command: {0}")]
    Spawn(String),
}

/// A stage failure as seen by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("failed to prepare working tree: {0}")]
    Workspace(std::io::Error),
}

impl PipelineError {
    /// The stage in which the failure occurred.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch(_) | PipelineError::Workspace(_) => Stage::Fetch,
            PipelineError::Build(_) => Stage::Build,
            PipelineError::Stage(_) => Stage::Stage,
            PipelineError::Publish(_) => Stage::Publish,
        }
    }

    /// Message returned to HTTP callers in the `error` field.
    pub fn public_message(&self) -> &'static str {
        match self {
            PipelineError::Fetch(FetchError::ExtractFailed(_)) => "No extracted folder found",
            PipelineError::Fetch(FetchError::NotFound { .. }) => "Repository not found",
            PipelineError::Fetch(FetchError::Unsupported(_)) => "Unsupported repository host",
            PipelineError::Fetch(_) | PipelineError::Workspace(_) => {
                "Failed to download repository"
            }
            PipelineError::Build(BuildError::Timeout { .. }) => "Build timed out",
            PipelineError::Build(_) => "Build failed",
            PipelineError::Stage(_) => "Failed to stage artifacts",
            PipelineError::Publish(PublishError::NoTransactionId) => {
                "Failed to retrieve transaction ID"
            }
            PipelineError::Publish(PublishError::Timeout { .. }) => "Deployment timed out",
            PipelineError::Publish(_) => "Deployment failed",
        }
    }

    /// Whether re-invoking the endpoint may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(FetchError::Network { .. })
                | PipelineError::Build(BuildError::Timeout { .. })
                | PipelineError::Publish(PublishError::Timeout { .. })
        )
    }
}
