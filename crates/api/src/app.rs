use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use extract::{Generator, OllamaClient, OpenAiClient};
use index::{GraphStats, GraphStore, Neo4jStore};
use pipeline::{FileLedger, Orchestrator, PipelineError, ProgressLedger, ProgressTracker, RunOptions, RunResult};

use crate::config::{AppConfig, LlmConfig, LlmProvider};

pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaClient::new(config.base_url.clone(), config.timeout())?),
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.timeout(),
        )?),
    };
    Ok(generator)
}

/// Connect the graph store, generation client and progress ledger.
pub async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let store: Arc<dyn GraphStore> = Arc::new(
        Neo4jStore::connect(&config.neo4j.uri, &config.neo4j.user, &config.neo4j.password).await?,
    );
    let generator = build_generator(&config.llm)?;

    let ledger: Arc<dyn ProgressLedger> = Arc::new(FileLedger::new(&config.progress.ledger_path));
    let progress = ProgressTracker::load(ledger)
        .await
        .with_context(|| format!("Failed to load ledger {}", config.progress.ledger_path.display()))?;

    info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        ledger = %config.progress.ledger_path.display(),
        "Pipeline ready"
    );
    Ok(Orchestrator::new(config.pipeline_config(), store, generator, progress))
}

pub struct AppState {
    /// Held for the whole run, so runs never overlap.
    orchestrator: Mutex<Orchestrator>,
    store: Arc<dyn GraphStore>,
    default_source: Option<PathBuf>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, default_source: Option<PathBuf>) -> Self {
        Self {
            store: orchestrator.store().clone(),
            orchestrator: Mutex::new(orchestrator),
            default_source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Ingestion(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub novel_path: Option<PathBuf>,
    pub reset: Option<bool>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    neo4j: String,
}

/// An empty body means "all defaults"; anything else must be a valid request.
fn parse_process_request(body: &[u8]) -> Result<ProcessRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ProcessRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/process", post(process_novel))
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn process_novel(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RunResult>, ApiError> {
    let req = parse_process_request(&body)?;

    let path = req
        .novel_path
        .or_else(|| state.default_source.clone())
        .ok_or_else(|| ApiError::BadRequest("novelPath is required".to_string()))?;

    let options = RunOptions {
        reset: req.reset.unwrap_or(false),
        model: req.model,
        temperature: req.temperature,
    };

    let mut orchestrator = state.orchestrator.lock().await;
    let result = orchestrator.run(&path, &options).await?;

    info!(
        path = %path.display(),
        processed = result.processed_chunks,
        skipped = result.skipped_chunks,
        "Process request finished"
    );
    Ok(Json(result))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ok",
            neo4j: "ok".to_string(),
        })),
        Err(e) => {
            warn!(error = %e, "Graph store health check failed");
            Err(ApiError::Unavailable(format!("neo4j: {:#}", e)))
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<GraphStats>, ApiError> {
    let stats = state.store
        .stats()
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;

    Ok(Json(stats))
}
