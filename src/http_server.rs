// HTTP REST API Server Implementation
// Ingestion and analysis triggers plus read-only queries over stored commits
// and graph nodes

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::analysis::{project_key_for, SonarQubeAnalyzer, StaticAnalyzer};
use crate::config::AppConfig;
use crate::error::{AnalysisError, Stage};
use crate::observability::{get_metrics, with_trace_id};
use crate::pipeline::{IngestionPipeline, PipelineResult};
use crate::stores::{CommitFilter, NodeFilter, StoreHandles};
use crate::types::{Commit, GraphNode, RepoCoordinates};

// Global server start time for uptime tracking
static SERVER_START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    stores: StoreHandles,
    pipeline: IngestionPipeline,
    analyzer: Option<Arc<dyn StaticAnalyzer>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        stores: StoreHandles,
        pipeline: IngestionPipeline,
        analyzer: Option<Arc<dyn StaticAnalyzer>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            stores,
            pipeline,
            analyzer,
        }
    }

    /// State wired with the production git, GitHub and SonarQube adapters
    pub fn from_config(config: AppConfig, stores: StoreHandles) -> Result<Self> {
        let pipeline = IngestionPipeline::from_config(&config, &stores)?;
        let analyzer: Option<Arc<dyn StaticAnalyzer>> = if config.analysis.enabled {
            Some(Arc::new(SonarQubeAnalyzer::new(config.analysis.clone())?))
        } else {
            None
        };
        Ok(Self::new(config, stores, pipeline, analyzer))
    }
}

/// Request body for repository ingestion
#[derive(Debug, Deserialize)]
pub struct FetchRepoRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct FetchRepoResponse {
    pub message: String,
    pub result: PipelineResult,
}

/// Request body for static analysis
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "githubUrl", alias = "url")]
    pub github_url: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub message: String,
    pub project_key: String,
    pub issues: serde_json::Value,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
            stage: None,
        }),
    )
}

fn parse_repository(url: &str) -> Result<RepoCoordinates, ApiError> {
    RepoCoordinates::from_github_url(url)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "invalid_repository_url", e.to_string()))
}

/// Create HTTP server with routes
pub fn create_server(state: AppState) -> Router {
    let request_timeout = state.config.server.request_timeout;

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/fetch-repo", post(fetch_repo))
        .route("/api/fetch-repo", post(fetch_repo))
        .route("/api/analyze", post(analyze_repo))
        .route("/api/query-commits", post(query_commits))
        .route("/api/query-metadata", post(query_metadata))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// Serve on an already bound listener until shutdown is signalled
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    once_cell::sync::Lazy::force(&SERVER_START_TIME);
    let app = create_server(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Start the HTTP server on the configured host and the given port
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("RepoGraph HTTP server starting on {}", addr);
    serve(listener, state).await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    let uptime_seconds = SERVER_START_TIME.elapsed().as_secs();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
    })
}

/// Process counters plus current store sizes
async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let counts = async {
        Ok::<_, anyhow::Error>((
            state.stores.commits.count().await?,
            state.stores.graph.node_count().await?,
            state.stores.graph.edge_count().await?,
        ))
    }
    .await;

    match counts {
        Ok((commits, nodes, edges)) => {
            let mut metrics = get_metrics();
            metrics["store"] = serde_json::json!({
                "commits": commits,
                "nodes": nodes,
                "edges": edges,
            });
            Ok(Json(metrics))
        }
        Err(e) => {
            warn!("Failed to read store counts: {:#}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "stats_failed",
                e.to_string(),
            ))
        }
    }
}

/// Run the ingestion pipeline for one repository
async fn fetch_repo(
    State(state): State<AppState>,
    Json(request): Json<FetchRepoRequest>,
) -> Result<Json<FetchRepoResponse>, ApiError> {
    let coords = parse_repository(&request.url)?;
    let dest = state.config.destination_for(&coords);

    let result = with_trace_id("fetch_repo", async {
        Ok(state.pipeline.run(&request.url, &dest).await)
    })
    .await
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "ingestion_failed", e.to_string()))?;

    if let Some(err) = result.fatal_error() {
        warn!("Ingestion of {} failed: {}", coords, err);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: err.kind().to_string(),
                message: err.to_string(),
                stage: Some(err.stage()),
            }),
        ));
    }

    Ok(Json(FetchRepoResponse {
        message: result.summary(),
        result,
    }))
}

/// Acquire the working copy, then run static analysis while holding its lock
async fn analyze_repo(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let analyzer = state.analyzer.clone().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "analysis_disabled",
            AnalysisError::Disabled.to_string(),
        )
    })?;
    let coords = parse_repository(&request.github_url)?;
    let dest = state.config.destination_for(&coords);
    let project_key = project_key_for(&coords.repo);

    let (_outcome, _guard) = state
        .pipeline
        .acquire_locked(&request.github_url, &dest)
        .await
        .map_err(|err| {
            warn!("{}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: err.kind().to_string(),
                    message: err.to_string(),
                    stage: Some(err.stage()),
                }),
            )
        })?;

    let issues = with_trace_id("analyze_repo", async {
        Ok(analyzer.analyze(&dest, &project_key).await?)
    })
    .await
    .map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "analysis_failed",
            format!("{:#}", e),
        )
    })?;

    Ok(Json(AnalyzeResponse {
        message: format!("Analysis of {} complete", coords),
        project_key,
        issues,
    }))
}

async fn query_commits(
    State(state): State<AppState>,
    Json(filter): Json<CommitFilter>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    with_trace_id("query_commits", state.stores.commits.find(&filter))
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", e.to_string()))
}

async fn query_metadata(
    State(state): State<AppState>,
    Json(filter): Json<NodeFilter>,
) -> Result<Json<Vec<GraphNode>>, ApiError> {
    with_trace_id("query_metadata", state.stores.graph.find_nodes(&filter))
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "query_failed", e.to_string()))
}
