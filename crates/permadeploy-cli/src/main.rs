//! Permadeploy CLI
//!
//! The `permadeploy` command runs the deployment pipeline locally, without
//! the HTTP daemon.
//!
//! ## Commands
//!
//! - `deploy`: fetch, build, stage and publish a repository
//! - `parse-txid`: extract the bundle transaction id from publish tool output
//! - `config`: print the effective configuration with secrets redacted

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use permadeploy_core::config::DEFAULT_GATEWAY_URL;
use permadeploy_core::telemetry::{init_tracing, level_for};
use permadeploy_core::{
    parse_transaction_id, DeployConfig, DeployPipeline, DeploymentRequest, FetchStrategy,
    PublishReceipt,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "permadeploy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy a repository to the permaweb", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, build, stage and publish a repository
    Deploy {
        /// Repository URL or `owner/name` shorthand
        repo_url: String,

        /// Fetch strategy (archive or clone); overrides PERMADEPLOY_FETCH_STRATEGY
        #[arg(short, long)]
        strategy: Option<FetchStrategy>,

        /// Working directory root; overrides PERMADEPLOY_WORK_ROOT
        #[arg(long)]
        work_root: Option<PathBuf>,

        /// Build step limit in seconds; overrides PERMADEPLOY_BUILD_TIMEOUT_SECS
        #[arg(long, value_name = "SECS")]
        build_timeout: Option<u64>,

        /// Publish step limit in seconds; overrides PERMADEPLOY_PUBLISH_TIMEOUT_SECS
        #[arg(long, value_name = "SECS")]
        publish_timeout: Option<u64>,
    },

    /// Print the transaction id found in publish tool output
    ParseTxid {
        /// File holding the output (default: stdin)
        file: Option<PathBuf>,

        /// Gateway used to build the public URL
        #[arg(long, env = "PERMADEPLOY_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
        gateway: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json, level_for(cli.verbose));

    match cli.command {
        Commands::Deploy {
            repo_url,
            strategy,
            work_root,
            build_timeout,
            publish_timeout,
        } => {
            let overrides = Overrides {
                strategy,
                work_root,
                build_timeout,
                publish_timeout,
            };
            cmd_deploy(&repo_url, overrides).await
        }
        Commands::ParseTxid { file, gateway } => cmd_parse_txid(file.as_deref(), &gateway),
        Commands::Config => cmd_config(),
    }
}

/// Command line settings that take precedence over the environment.
#[derive(Debug, Default)]
struct Overrides {
    strategy: Option<FetchStrategy>,
    work_root: Option<PathBuf>,
    build_timeout: Option<u64>,
    publish_timeout: Option<u64>,
}

impl Overrides {
    fn apply(self, mut config: DeployConfig) -> DeployConfig {
        if let Some(strategy) = self.strategy {
            config = config.with_fetch_strategy(strategy);
        }
        if let Some(root) = self.work_root {
            config = config.with_work_root(root);
        }
        if self.build_timeout.is_some() || self.publish_timeout.is_some() {
            let build = self.build_timeout.unwrap_or(config.build_timeout_secs);
            let publish = self.publish_timeout.unwrap_or(config.publish_timeout_secs);
            config = config.with_timeouts(build, publish);
        }
        config
    }
}

async fn cmd_deploy(repo_url: &str, overrides: Overrides) -> Result<()> {
    let env = DeployConfig::from_env().context("Failed to load configuration")?;
    let config = overrides.apply(env);

    let request = DeploymentRequest::manual(repo_url)?;
    let pipeline = DeployPipeline::from_config(&config);
    pipeline.accept(&request)?;
    info!(
        reference = %request.source.canonical_url,
        strategy = %config.fetch_strategy,
        "deploying"
    );

    let outcome = pipeline.run(request).await;
    let response = outcome.to_response();
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    match outcome.result {
        Ok(_) => Ok(()),
        Err(e) => bail!("{}: {}", e.public_message(), e),
    }
}

fn cmd_parse_txid(file: Option<&Path>, gateway: &str) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };
    let receipt = receipt_from(&text, gateway)?;
    println!("{}", receipt.transaction_id);
    println!("{}", receipt.public_url);
    Ok(())
}

fn receipt_from(text: &str, gateway: &str) -> Result<PublishReceipt> {
    let txid = parse_transaction_id(text).context("No 'Bundle TxId [...]' marker found")?;
    Ok(PublishReceipt::new(txid, gateway))
}

fn cmd_config() -> Result<()> {
    let config = DeployConfig::from_env().context("Failed to load configuration")?;
    println!("{}", serde_json::to_string_pretty(&config.redacted_json())?);
    Ok(())
}
