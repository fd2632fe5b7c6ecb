//! HTTP-style responses produced by the orchestrator.

use serde_json::{json, Value};

use crate::domain::{PublishReceipt, RunLog};
use crate::error::{PipelineError, RequestError};

/// Status code plus JSON body. Transport-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployResponse {
    pub status: u16,
    pub body: Value,
}

impl DeployResponse {
    /// 200 `{ deployUrl, logs }`.
    pub fn ok(receipt: &PublishReceipt, log: &RunLog) -> Self {
        Self {
            status: 200,
            body: json!({
                "deployUrl": receipt.public_url,
                "logs": log.render(),
            }),
        }
    }

    /// 400 `{ error, logs }`.
    pub fn bad_request(error: &RequestError, log: &RunLog) -> Self {
        Self {
            status: 400,
            body: json!({
                "error": error.to_string(),
                "logs": log.render(),
            }),
        }
    }

    /// 500 `{ error, logs, retryable }`.
    pub fn failure(error: &PipelineError, log: &RunLog) -> Self {
        Self {
            status: 500,
            body: json!({
                "error": error.public_message(),
                "logs": log.render(),
                "retryable": error.is_retryable(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
