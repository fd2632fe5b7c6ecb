//! Publish receipts.

use serde::{Deserialize, Serialize};

/// Result of a successful publish. Produced once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Bundle transaction id reported by the publish tool.
    pub transaction_id: String,

    /// Public gateway URL of the bundle.
    pub public_url: String,
}

impl PublishReceipt {
    /// Build a receipt by templating `transaction_id` onto `gateway`.
    pub fn new(transaction_id: impl Into<String>, gateway: &str) -> Self {
        let transaction_id = transaction_id.into();
        let public_url = format!("{}/{}", gateway.trim_end_matches('/'), transaction_id);
        Self {
            transaction_id,
            public_url,
        }
    }
}
