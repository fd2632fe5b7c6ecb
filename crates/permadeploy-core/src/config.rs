//! Service configuration.
//!
//! Everything is read from environment variables. [`DeployConfig::from_lookup`]
//! takes the lookup as a closure so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_HOSTING_HOST: &str = "github.com";
pub const DEFAULT_GATEWAY_URL: &str = "https://arweave.net";
pub const DEFAULT_BUILD_COMMAND: &str = "npm install && npm run build";
pub const DEFAULT_BUILD_DIR: &str = "build";
pub const DEFAULT_PUBLISH_COMMAND: &str = "npx permaweb-deploy";
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 600;

/// How repository snapshots are obtained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Download the hosting platform's zipball and extract it.
    #[default]
    Archive,
    /// Run `git clone`.
    Clone,
}

impl FromStr for FetchStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" | "zip" | "zipball" => Ok(FetchStrategy::Archive),
            "clone" | "git" => Ok(FetchStrategy::Clone),
            _ => Err(ConfigError::InvalidValue {
                key: "PERMADEPLOY_FETCH_STRATEGY",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Archive => f.write_str("archive"),
            FetchStrategy::Clone => f.write_str("clone"),
        }
    }
}

/// Complete pipeline and daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Hosting access token forwarded on archive downloads.
    #[serde(skip_serializing, default)]
    pub hosting_token: Option<String>,

    /// Publish-process identifier passed as `--ant-process`.
    pub process_id: String,

    pub port: u16,

    pub bind: String,

    /// Parent directory of per-run working trees.
    pub work_root: PathBuf,

    pub fetch_strategy: FetchStrategy,

    /// Hosting API base URL.
    pub api_url: String,

    /// Repository host the archive API serves.
    pub hosting_host: String,

    /// Base URL bundles are served from.
    pub gateway_url: String,

    /// Build argv (first element is the executable).
    pub build_command: Vec<String>,

    /// Name of the directory the build writes its output to.
    pub build_dir: String,

    /// Publish argv; `--ant-process <process_id>` is appended.
    pub publish_command: Vec<String>,

    /// Build ceiling in seconds, 0 disables it.
    pub build_timeout_secs: u64,

    /// Publish ceiling in seconds, 0 disables it.
    pub publish_timeout_secs: u64,
}

impl DeployConfig {
    /// Create a configuration with defaults for everything but the process id.
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            hosting_token: None,
            process_id: process_id.into(),
            port: DEFAULT_PORT,
            bind: "0.0.0.0".to_string(),
            work_root: std::env::temp_dir().join("permadeploy"),
            fetch_strategy: FetchStrategy::default(),
            api_url: DEFAULT_API_URL.to_string(),
            hosting_host: DEFAULT_HOSTING_HOST.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            build_command: shell_command(DEFAULT_BUILD_COMMAND),
            build_dir: DEFAULT_BUILD_DIR.to_string(),
            publish_command: split_command(DEFAULT_PUBLISH_COMMAND),
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT_SECS,
            publish_timeout_secs: DEFAULT_PUBLISH_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - ANT_PROCESS_KEY (required)
    /// - GITHUB_TOKEN (optional)
    /// - PORT (optional, default: 5001)
    /// - PERMADEPLOY_BIND (optional, default: "0.0.0.0")
    /// - PERMADEPLOY_WORK_ROOT (optional, default: `$TMPDIR/permadeploy`)
    /// - PERMADEPLOY_FETCH_STRATEGY (optional, `archive` or `clone`)
    /// - PERMADEPLOY_API_URL / PERMADEPLOY_GATEWAY_URL (optional)
    /// - PERMADEPLOY_HOSTING_HOST (optional, default: "github.com")
    /// - PERMADEPLOY_BUILD_COMMAND (optional, run through `sh -c`)
    /// - PERMADEPLOY_BUILD_DIR (optional, default: "build")
    /// - PERMADEPLOY_PUBLISH_COMMAND (optional, whitespace separated)
    /// - PERMADEPLOY_BUILD_TIMEOUT_SECS / PERMADEPLOY_PUBLISH_TIMEOUT_SECS (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DeployConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let process_id = get("ANT_PROCESS_KEY").ok_or(ConfigError::Missing("ANT_PROCESS_KEY"))?;
        let mut config = Self::new(process_id);

        config.hosting_token = get("GITHUB_TOKEN");

        if let Some(port) = get("PORT") {
            config.port = parse_number("PORT", &port)?;
        }
        if let Some(bind) = get("PERMADEPLOY_BIND") {
            config.bind = bind;
        }
        if let Some(root) = get("PERMADEPLOY_WORK_ROOT") {
            config.work_root = PathBuf::from(root);
        }
        if let Some(strategy) = get("PERMADEPLOY_FETCH_STRATEGY") {
            config.fetch_strategy = strategy.parse()?;
        }
        if let Some(api) = get("PERMADEPLOY_API_URL") {
            config.api_url = api;
        }
        if let Some(host) = get("PERMADEPLOY_HOSTING_HOST") {
            config.hosting_host = host.to_ascii_lowercase();
        }
        if let Some(gateway) = get("PERMADEPLOY_GATEWAY_URL") {
            config.gateway_url = gateway;
        }
        if let Some(cmd) = get("PERMADEPLOY_BUILD_COMMAND") {
            config.build_command = shell_command(&cmd);
        }
        if let Some(dir) = get("PERMADEPLOY_BUILD_DIR") {
            config.build_dir = dir;
        }
        if let Some(cmd) = get("PERMADEPLOY_PUBLISH_COMMAND") {
            config.publish_command = split_command(&cmd);
        }
        if let Some(secs) = get("PERMADEPLOY_BUILD_TIMEOUT_SECS") {
            config.build_timeout_secs = parse_number("PERMADEPLOY_BUILD_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = get("PERMADEPLOY_PUBLISH_TIMEOUT_SECS") {
            config.publish_timeout_secs = parse_number("PERMADEPLOY_PUBLISH_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }

    /// Set the hosting token.
    pub fn with_hosting_token(mut self, token: impl Into<String>) -> Self {
        self.hosting_token = Some(token.into());
        self
    }

    /// Set the working-tree root.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    /// Set the fetch strategy.
    pub fn with_fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = strategy;
        self
    }

    /// Set the hosting API base URL.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the repository host served by the archive API.
    pub fn with_hosting_host(mut self, host: impl Into<String>) -> Self {
        self.hosting_host = host.into();
        self
    }

    /// Replace the build argv.
    pub fn with_build_command(mut self, argv: Vec<String>) -> Self {
        self.build_command = argv;
        self
    }

    /// Replace the publish argv.
    pub fn with_publish_command(mut self, argv: Vec<String>) -> Self {
        self.publish_command = argv;
        self
    }

    /// Set both subprocess ceilings.
    pub fn with_timeouts(mut self, build_secs: u64, publish_secs: u64) -> Self {
        self.build_timeout_secs = build_secs;
        self.publish_timeout_secs = publish_secs;
        self
    }

    /// JSON view of the configuration with the token redacted.
    pub fn redacted_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            let token = if self.hosting_token.is_some() {
                serde_json::Value::String("***".to_string())
            } else {
                serde_json::Value::Null
            };
            obj.insert("hosting_token".to_string(), token);
        }
        value
    }
}

/// Wrap a shell snippet as `sh -c <snippet>`.
pub fn shell_command(snippet: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), snippet.to_string()]
}

/// Split a command line on whitespace.
pub fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
