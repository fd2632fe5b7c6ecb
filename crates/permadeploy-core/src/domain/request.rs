//! Deployment requests and repository reference normalization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_HOSTING_HOST;
use crate::error::RequestError;

/// Header whose presence marks a request as a hosting-platform webhook delivery.
pub const WEBHOOK_EVENT_HEADER: &str = "x-github-event";

/// How a deployment was triggered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Webhook,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Webhook => "webhook",
        }
    }
}

/// A normalized repository reference.
///
/// Accepted forms:
/// - `https://github.com/org/site` (optionally with `.git` or a trailing `/`)
/// - `git@github.com:org/site.git`
/// - `file:///srv/repos/site.git` (local clones)
/// - `org/site` shorthand, resolved against `github.com`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceReference {
    /// The reference exactly as supplied (trimmed).
    pub raw: String,

    /// Reference with trailing `/` and `.git` removed.
    pub canonical_url: String,

    /// Hosting platform host, empty for `file://` references.
    pub host: String,

    /// Owning account or parent directory.
    pub owner: String,

    /// Canonical short name (last path segment).
    pub name: String,

    /// Stable 12-hex-char digest of `canonical_url`.
    pub identity: String,

    /// URL handed to `git clone`.
    pub clone_url: String,
}

impl SourceReference {
    /// Parse and normalize a raw reference.
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RequestError::MissingReference);
        }

        let stripped = strip_suffixes(raw);
        let invalid = || RequestError::InvalidReference(raw.to_string());

        let (host, owner, name, canonical_url, clone_url) =
            if let Some((scheme, rest)) = stripped.split_once("://") {
                let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
                match scheme {
                    "http" | "https" => {
                        let [host, owner, name] = segments.as_slice() else {
                            return Err(invalid());
                        };
                        (
                            host.to_string(),
                            owner.to_string(),
                            name.to_string(),
                            stripped.to_string(),
                            raw.to_string(),
                        )
                    }
                    "file" => {
                        if segments.len() < 2 {
                            return Err(invalid());
                        }
                        let name = segments[segments.len() - 1];
                        let owner = segments[segments.len() - 2];
                        (
                            String::new(),
                            owner.to_string(),
                            name.to_string(),
                            stripped.to_string(),
                            raw.to_string(),
                        )
                    }
                    _ => return Err(invalid()),
                }
            } else if let Some(rest) = stripped.strip_prefix("git@") {
                let (host, path) = rest.split_once(':').ok_or_else(invalid)?;
                let (owner, name) = path.split_once('/').ok_or_else(invalid)?;
                (
                    host.to_string(),
                    owner.to_string(),
                    name.to_string(),
                    format!("https://{host}/{owner}/{name}"),
                    raw.to_string(),
                )
            } else {
                let (owner, name) = stripped.split_once('/').ok_or_else(invalid)?;
                let canonical = format!("https://{DEFAULT_HOSTING_HOST}/{owner}/{name}");
                let clone = format!("{canonical}.git");
                (
                    DEFAULT_HOSTING_HOST.to_string(),
                    owner.to_string(),
                    name.to_string(),
                    canonical,
                    clone,
                )
            };

        if !is_valid_segment(&owner) || !is_valid_segment(&name) {
            return Err(invalid());
        }

        let identity = compute_identity(&canonical_url);

        Ok(Self {
            raw: raw.to_string(),
            canonical_url,
            host,
            owner,
            name,
            identity,
            clone_url,
        })
    }

    /// Zipball endpoint for this reference on the hosting API.
    pub fn archive_url(&self, api_base: &str) -> String {
        format!(
            "{}/repos/{}/{}/zipball",
            api_base.trim_end_matches('/'),
            self.owner,
            self.name
        )
    }
}

/// An accepted deployment request. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub source: SourceReference,
    pub trigger: Trigger,
}

impl DeploymentRequest {
    /// Build a manual request from a raw reference.
    pub fn manual(reference: &str) -> Result<Self, RequestError> {
        Ok(Self {
            source: SourceReference::parse(reference)?,
            trigger: Trigger::Manual,
        })
    }

    /// Build a request from a JSON body.
    ///
    /// `webhook_event` is the value of [`WEBHOOK_EVENT_HEADER`], if present.
    /// Webhook payloads carry the reference at `repository.clone_url`, manual
    /// payloads at `repoUrl`.
    pub fn from_payload(
        webhook_event: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<Self, RequestError> {
        let (trigger, reference) = match webhook_event {
            Some(_) => (
                Trigger::Webhook,
                body.pointer("/repository/clone_url")
                    .and_then(|v| v.as_str()),
            ),
            None => (Trigger::Manual, body.get("repoUrl").and_then(|v| v.as_str())),
        };

        let reference = reference.ok_or(RequestError::MissingReference)?;
        Ok(Self {
            source: SourceReference::parse(reference)?,
            trigger,
        })
    }
}

fn strip_suffixes(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.trim_end_matches('/')
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn compute_identity(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}
