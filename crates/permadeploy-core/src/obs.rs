//! Structured observability hooks for pipeline runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan`
//! - Emission functions for key lifecycle events: start, transition, finish, cleanup
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).

use tracing::{info, warn, Instrument};

use crate::domain::Stage;

/// Run-scoped tracing span.
///
/// Pipeline runs are async, so the span is attached to the run future with
/// [`RunSpan::instrument`] rather than entered on the current thread.
pub struct RunSpan {
    span: tracing::Span,
}

impl RunSpan {
    /// Create a span tagged with the run id and repository name.
    pub fn new(run_id: &str, repo: &str) -> Self {
        Self {
            span: tracing::info_span!("permadeploy.run", run_id = %run_id, repo = %repo),
        }
    }

    /// Attach the span to a future.
    pub fn instrument<F: std::future::Future>(
        self,
        fut: F,
    ) -> tracing::instrument::Instrumented<F> {
        fut.instrument(self.span)
    }
}

/// Emit event: run started for a reference.
pub fn emit_run_started(run_id: &str, reference: &str, trigger: &str) {
    info!(event = "run.started", run_id = %run_id, reference = %reference, trigger = %trigger);
}

/// Emit event: pipeline moved to a new state.
pub fn emit_transition(run_id: &str, from: &str, to: &str, seq: u64) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to, seq = seq);
}

/// Emit event: a stage failed.
pub fn emit_stage_failed(run_id: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "run.stage_failed", run_id = %run_id, stage = %stage, error = %error);
}

/// Emit event: run finished with duration and success status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, log_entries: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        log_entries = log_entries,
        success = success,
    );
}

/// Emit event: request rejected before a run started.
pub fn emit_request_rejected(reason: &dyn std::fmt::Display) {
    info!(event = "request.rejected", reason = %reason);
}
