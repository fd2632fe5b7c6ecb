//! permadeployd: HTTP front end for the deployment pipeline.
//!
//! Routes:
//! - `POST /deploy`: run one deployment; body `{"repoUrl": ...}` or a
//!   repository webhook payload when the event header is present
//! - `GET /health`: liveness plus run counters

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use permadeploy_core::telemetry::{init_tracing, level_for};
use permadeploy_core::{
    DeployConfig, DeployPipeline, DeployResponse, METRICS, VERSION, WEBHOOK_EVENT_HEADER,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Command line arguments. Everything else comes from the environment.
#[derive(Parser, Debug)]
#[command(name = "permadeployd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy repositories to the permaweb over HTTP")]
struct Args {
    /// HTTP port to listen on (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides PERMADEPLOY_BIND).
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Application state shared between handlers.
struct AppState {
    pipeline: Arc<DeployPipeline>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.json, level_for(args.verbose));

    let mut config = DeployConfig::from_env().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    info!(config = %config.redacted_json(), "starting permadeployd");

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("invalid bind address")?;

    let app = router(Arc::new(DeployPipeline::from_config(&config)));

    info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(pipeline: Arc<DeployPipeline>) -> Router {
    let state = Arc::new(AppState { pipeline });
    Router::new()
        .route("/deploy", post(deploy_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for `/deploy`.
///
/// The run executes on its own task so a client disconnect does not abort
/// it halfway through publishing.
async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let event = headers
        .get(WEBHOOK_EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move { pipeline.handle_raw(event.as_deref(), &body).await });

    let response = match task.await {
        Ok(response) => response,
        Err(e) => {
            error!("deployment task aborted: {}", e);
            DeployResponse {
                status: 500,
                body: json!({ "error": "Deployment failed", "logs": "" }),
            }
        }
    };

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body))
}

/// Handler for `/health`.
async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": VERSION,
            "metrics": METRICS.snapshot(),
        })),
    )
}
