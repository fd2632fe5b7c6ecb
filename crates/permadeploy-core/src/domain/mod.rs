//! Domain models for permadeploy.
//!
//! Canonical definitions for the core entities:
//! - `DeploymentRequest`: an accepted, immutable request to deploy a reference
//! - `SourceReference`: a normalized repository reference
//! - `RunLog` / `StageResult`: the append-only record of a run
//! - `PublishReceipt`: the result of a successful publish

pub mod log;
pub mod receipt;
pub mod request;

pub use log::{RunLog, Stage, StageResult, StageStatus};
pub use receipt::PublishReceipt;
pub use request::{DeploymentRequest, SourceReference, Trigger, WEBHOOK_EVENT_HEADER};
