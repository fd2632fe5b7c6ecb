//! Publishing staged artifacts with the external permaweb CLI.
//!
//! The CLI contract is textual: on success it prints a line containing
//! `Bundle TxId [<id>]`. Parsing lives in [`parse_transaction_id`] so the rule
//! can be tested without spawning anything.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::PublishReceipt;
use crate::error::{ProcessError, PublishError};
use crate::process::{tail, CommandSpec, ProcessRunner};

const STDERR_TAIL: usize = 4096;

fn tx_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Bundle TxId \[([^\]\s]+)\]").expect("transaction id pattern is valid")
    })
}

/// Extract the first bundle transaction id from publish tool output.
pub fn parse_transaction_id(output: &str) -> Option<String> {
    tx_pattern()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs the publish CLI.
#[derive(Debug, Clone)]
pub struct Publisher {
    command: Vec<String>,
    process_id: String,
    gateway_url: String,
    timeout_secs: u64,
}

impl Publisher {
    pub fn new(
        command: Vec<String>,
        process_id: impl Into<String>,
        gateway_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            command,
            process_id: process_id.into(),
            gateway_url: gateway_url.into(),
            timeout_secs,
        }
    }

    /// Full argv: the configured command plus `--ant-process <id>`.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push("--ant-process".to_string());
        argv.push(self.process_id.clone());
        argv
    }

    /// Publish the staging directory under `tree_root`.
    ///
    /// The CLI runs with `tree_root` as its working directory and picks up
    /// the staging directory from there.
    pub async fn publish(&self, tree_root: &Path) -> Result<PublishReceipt, PublishError> {
        info!(command = ?self.command, "publishing staged artifacts");
        let spec = CommandSpec::new("publish", self.argv(), tree_root)
            .with_timeout(self.timeout_secs);

        let output = ProcessRunner::run(&spec).await.map_err(|e| match e {
            ProcessError::TimedOut { secs, .. } => PublishError::Timeout { secs },
            other => PublishError::Spawn(other.to_string()),
        })?;

        debug!(
            stdout = %tail(&output.stdout, STDERR_TAIL),
            stderr = %tail(&output.stderr, STDERR_TAIL),
            "publish output"
        );

        if !output.success() {
            return Err(PublishError::CliFailure {
                exit_code: output.exit_code,
                stderr: tail(output.stderr.trim(), STDERR_TAIL).to_string(),
            });
        }

        let transaction_id =
            parse_transaction_id(&output.stdout).ok_or(PublishError::NoTransactionId)?;
        Ok(PublishReceipt::new(transaction_id, &self.gateway_url))
    }
}
