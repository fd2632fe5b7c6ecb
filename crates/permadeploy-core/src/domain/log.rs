//! Append-only run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages that produce log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Request,
    Fetch,
    Build,
    Stage,
    Publish,
    Cleanup,
}

impl Stage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Request => "request",
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Stage => "stage",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Failed,
}

/// One entry of a run log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    /// Ordinal within the run, starting at 1.
    pub seq: u64,

    pub stage: Stage,

    pub status: StageStatus,

    pub message: String,

    /// Wall-clock time the entry was appended.
    pub at: DateTime<Utc>,
}

/// Ordered, append-only sequence of [`StageResult`]s for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunLog {
    entries: Vec<StageResult>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence number.
    pub fn push(&mut self, stage: Stage, status: StageStatus, message: impl Into<String>) -> u64 {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(StageResult {
            seq,
            stage,
            status,
            message: message.into(),
            at: Utc::now(),
        });
        seq
    }

    pub fn ok(&mut self, stage: Stage, message: impl Into<String>) -> u64 {
        self.push(stage, StageStatus::Ok, message)
    }

    pub fn failed(&mut self, stage: Stage, message: impl Into<String>) -> u64 {
        self.push(stage, StageStatus::Failed, message)
    }

    pub fn entries(&self) -> &[StageResult] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry recorded a failure.
    pub fn has_failure(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.status == StageStatus::Failed)
    }

    /// Render as newline-separated text for HTTP responses.
    ///
    /// Format: `[<seq>] <rfc3339> <stage> <ok|failed>: <message>`
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                let status = match e.status {
                    StageStatus::Ok => "ok",
                    StageStatus::Failed => "failed",
                };
                format!(
                    "[{}] {} {} {}: {}",
                    e.seq,
                    e.at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    e.stage,
                    status,
                    e.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
