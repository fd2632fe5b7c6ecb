//! Deployment pipeline orchestration.
//!
//! A run walks a linear state machine:
//!
//! ```text
//! Received → Fetched → (Built | PassedThrough) → Staged → Published → CleanedUp(success)
//!     └──────────┴──────────────┴─────────────────┴──────────┴→ Failed(stage) → CleanedUp(failure)
//! ```
//!
//! Every transition appends one entry to the run log. Cleanup runs on both
//! terminal paths; if the run future is dropped or panics, the working tree
//! guard removes the directory instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::build::{BuildOutput, BuildRunner};
use crate::config::DeployConfig;
use crate::domain::{
    DeploymentRequest, PublishReceipt, RunLog, SourceReference, Stage, StageStatus,
};
use crate::error::{PipelineError, RequestError};
use crate::fetch::{fetcher_for, SourceFetcher};
use crate::metrics::METRICS;
use crate::obs::{
    emit_request_rejected, emit_run_finished, emit_run_started, emit_stage_failed,
    emit_transition, RunSpan,
};
use crate::publish::Publisher;
use crate::response::DeployResponse;
use crate::staging::ArtifactStager;
use crate::workspace::{WorkingTree, STAGING_DIR};

/// States of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Fetched,
    Built,
    PassedThrough,
    Staged,
    Published,
    Failed { stage: Stage, reason: String },
    CleanedUp { success: bool },
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Fetched => "fetched",
            PipelineState::Built => "built",
            PipelineState::PassedThrough => "passed_through",
            PipelineState::Staged => "staged",
            PipelineState::Published => "published",
            PipelineState::Failed { .. } => "failed",
            PipelineState::CleanedUp { .. } => "cleaned_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::CleanedUp { .. })
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (CleanedUp { .. }, _) => false,
            (Failed { .. }, CleanedUp { success }) => !success,
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Received, Fetched)
            | (Fetched, Built)
            | (Fetched, PassedThrough)
            | (Built, Staged)
            | (PassedThrough, Staged)
            | (Staged, Published) => true,
            (Published, CleanedUp { success }) => *success,
            _ => false,
        }
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    run_id: String,
    state: PipelineState,
    log: RunLog,
}

impl RunState {
    fn new(run_id: &Uuid, request: &DeploymentRequest) -> Self {
        let mut log = RunLog::new();
        log.ok(
            Stage::Request,
            format!(
                "accepted {} deployment of {}",
                request.trigger.name(),
                request.source.canonical_url
            ),
        );
        Self {
            run_id: run_id.to_string(),
            state: PipelineState::Received,
            log,
        }
    }

    fn transition(
        &mut self,
        next: PipelineState,
        stage: Stage,
        status: StageStatus,
        message: String,
    ) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal transition {} -> {}",
            self.state.name(),
            next.name()
        );
        let seq = self.log.push(stage, status, message);
        emit_transition(&self.run_id, self.state.name(), next.name(), seq);
        self.state = next;
    }

    fn advance(&mut self, next: PipelineState, stage: Stage, message: String) {
        self.transition(next, stage, StageStatus::Ok, message);
    }

    fn fail(&mut self, error: &PipelineError) {
        let stage = error.stage();
        emit_stage_failed(&self.run_id, stage, error);
        self.transition(
            PipelineState::Failed {
                stage,
                reason: error.to_string(),
            },
            stage,
            StageStatus::Failed,
            error.to_string(),
        );
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct DeployOutcome {
    pub run_id: Uuid,

    /// Terminal state; always `CleanedUp`.
    pub state: PipelineState,

    pub log: RunLog,

    pub result: Result<PublishReceipt, PipelineError>,

    /// Run directory that held the working tree, if one was created.
    pub working_dir: Option<PathBuf>,

    pub duration_ms: u64,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Map the outcome to 200 or 500.
    pub fn to_response(&self) -> DeployResponse {
        match &self.result {
            Ok(receipt) => DeployResponse::ok(receipt, &self.log),
            Err(error) => DeployResponse::failure(error, &self.log),
        }
    }
}

/// The deployment orchestrator.
pub struct DeployPipeline {
    work_root: PathBuf,
    fetcher: Arc<dyn SourceFetcher>,
    builder: BuildRunner,
    publisher: Publisher,
}

impl DeployPipeline {
    pub fn new(
        work_root: impl Into<PathBuf>,
        fetcher: Arc<dyn SourceFetcher>,
        builder: BuildRunner,
        publisher: Publisher,
    ) -> Self {
        Self {
            work_root: work_root.into(),
            fetcher,
            builder,
            publisher,
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(
            config.work_root.clone(),
            fetcher_for(config),
            BuildRunner::new(
                config.build_command.clone(),
                config.build_dir.clone(),
                config.build_timeout_secs,
            ),
            Publisher::new(
                config.publish_command.clone(),
                config.process_id.clone(),
                config.gateway_url.clone(),
                config.publish_timeout_secs,
            ),
        )
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Parse a raw request body and run it.
    ///
    /// Invalid JSON or a missing/invalid reference yields a 400 before any
    /// filesystem work happens.
    pub async fn handle_raw(&self, webhook_event: Option<&str>, body: &[u8]) -> DeployResponse {
        let body: Value = if body.iter().all(|b| b.is_ascii_whitespace()) {
            Value::Null
        } else {
            match serde_json::from_slice(body) {
                Ok(v) => v,
                Err(e) => return reject(RequestError::MalformedBody(e.to_string())),
            }
        };
        self.handle(webhook_event, &body).await
    }

    /// Parse a JSON request and run it.
    pub async fn handle(&self, webhook_event: Option<&str>, body: &Value) -> DeployResponse {
        let request = DeploymentRequest::from_payload(webhook_event, body).and_then(|request| {
            self.accept(&request)?;
            Ok(request)
        });
        match request {
            Ok(request) => self.run(request).await.to_response(),
            Err(error) => reject(error),
        }
    }

    /// Check that the configured fetcher can serve `request`.
    pub fn accept(&self, request: &DeploymentRequest) -> Result<(), RequestError> {
        self.fetcher.accepts(&request.source)
    }

    /// Run a request to a terminal state.
    pub async fn run(&self, request: DeploymentRequest) -> DeployOutcome {
        let run_id = Uuid::new_v4();
        let span = RunSpan::new(&run_id.to_string(), &request.source.name);
        span.instrument(self.execute(run_id, request)).await
    }

    async fn execute(&self, run_id: Uuid, request: DeploymentRequest) -> DeployOutcome {
        let started = Instant::now();
        METRICS.inc_runs_started();

        let mut run = RunState::new(&run_id, &request);
        emit_run_started(&run.run_id, &request.source.raw, request.trigger.name());

        let (result, working_dir) = match WorkingTree::create(&self.work_root, &request.source) {
            Ok(tree) => {
                let working_dir = tree.run_dir().to_path_buf();
                let result = self.drive(&mut run, &request.source, &tree).await;
                if let Err(error) = &result {
                    run.fail(error);
                }

                let report = tree.cleanup();
                let success = result.is_ok();
                match &report.error {
                    None => run.advance(
                        PipelineState::CleanedUp { success },
                        Stage::Cleanup,
                        "removed working tree".to_string(),
                    ),
                    Some(e) => run.transition(
                        PipelineState::CleanedUp { success },
                        Stage::Cleanup,
                        StageStatus::Failed,
                        format!("failed to remove working tree: {e}"),
                    ),
                }
                (result, Some(working_dir))
            }
            Err(e) => {
                let error = PipelineError::Workspace(e);
                run.fail(&error);
                run.advance(
                    PipelineState::CleanedUp { success: false },
                    Stage::Cleanup,
                    "no working tree to remove".to_string(),
                );
                (Err(error), None)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if result.is_ok() {
            METRICS.inc_runs_succeeded();
        } else {
            METRICS.inc_runs_failed();
        }
        emit_run_finished(&run.run_id, duration_ms, run.log.len(), result.is_ok());
        METRICS.flush();

        DeployOutcome {
            run_id,
            state: run.state,
            log: run.log,
            result,
            working_dir,
            duration_ms,
        }
    }

    async fn drive(
        &self,
        run: &mut RunState,
        source: &SourceReference,
        tree: &WorkingTree,
    ) -> Result<PublishReceipt, PipelineError> {
        let root = self.fetcher.fetch(source, tree).await?;
        run.advance(
            PipelineState::Fetched,
            Stage::Fetch,
            format!(
                "fetched {} via {}",
                source.canonical_url,
                self.fetcher.strategy()
            ),
        );

        let output = self.builder.build_or_passthrough(&root).await?;
        match &output {
            BuildOutput::Built { dir, duration_ms } => run.advance(
                PipelineState::Built,
                Stage::Build,
                format!(
                    "build finished in {duration_ms}ms, output in {}",
                    relative_name(&root, dir)
                ),
            ),
            BuildOutput::PassedThrough { .. } => run.advance(
                PipelineState::PassedThrough,
                Stage::Build,
                "no build manifest, publishing repository contents".to_string(),
            ),
        }

        let staged = ArtifactStager::stage(&root, &output).await?;
        run.advance(
            PipelineState::Staged,
            Stage::Stage,
            format!(
                "moved {} entries into {STAGING_DIR}: {}",
                staged.moved.len(),
                staged.moved.join(", ")
            ),
        );

        let receipt = self.publisher.publish(&root).await?;
        info!(tx_id = %receipt.transaction_id, url = %receipt.public_url, "bundle published");
        run.advance(
            PipelineState::Published,
            Stage::Publish,
            format!(
                "bundle {} available at {}",
                receipt.transaction_id, receipt.public_url
            ),
        );

        Ok(receipt)
    }
}

fn reject(error: RequestError) -> DeployResponse {
    emit_request_rejected(&error);
    let mut log = RunLog::new();
    log.failed(Stage::Request, error.to_string());
    DeployResponse::bad_request(&error, &log)
}

fn relative_name(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .display()
        .to_string()
}
