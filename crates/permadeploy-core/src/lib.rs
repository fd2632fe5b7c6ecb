//! Permadeploy Core Library
//!
//! Fetches a repository snapshot, builds it when it carries a build manifest,
//! stages the publishable output and hands it to the permaweb publish tool.
//! Every run gets its own working tree, which is removed on every exit path.

pub mod build;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod response;
pub mod staging;
pub mod telemetry;
pub mod workspace;

pub use build::{BuildOutput, BuildRunner, BUILD_MANIFEST};

pub use config::{DeployConfig, FetchStrategy};

pub use domain::{
    DeploymentRequest, PublishReceipt, RunLog, SourceReference, Stage, StageResult, StageStatus,
    Trigger, WEBHOOK_EVENT_HEADER,
};

pub use error::{
    BuildError, ConfigError, FetchError, PipelineError, ProcessError, PublishError, RequestError,
    StageError,
};

pub use fetch::{ArchiveFetcher, CloneFetcher, SourceFetcher};

pub use metrics::{MetricsSnapshot, METRICS};

pub use pipeline::{DeployOutcome, DeployPipeline, PipelineState};

pub use publish::{parse_transaction_id, Publisher};

pub use response::DeployResponse;

pub use staging::{ArtifactStager, StagedArtifacts};

pub use workspace::{CleanupReport, WorkingTree, STAGING_DIR};

/// Crate version, reported by the daemon health endpoint and the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
