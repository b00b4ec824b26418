//! HTTP server exposing the signal pipeline operations.
//!
//! This module provides an HTTP server that:
//! - Accepts signal chunks via POST /v1/ingest
//! - Serves recent chunks via GET /v1/recent
//! - Runs the extract-and-predict pass via POST /v1/extract
//!
//! # Architecture
//!
//! ```text
//! Acquisition client ──→ POST /v1/ingest ──→ ChunkStore (SQLite)
//! Analysis client ─────→ POST /v1/extract ──→ select → compute → persist
//!                                                  │
//!                                                  ▼
//!                                         inference service
//! ```

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::core::FeatureSet;
use crate::inference::InferenceConfig;
use crate::pipeline::{IngestRequest, Pipeline, PipelineError, PredictionOutcome, StatsSnapshot};
use crate::store::{Database, SignalChunk};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// SQLite database location
    pub database_path: PathBuf,
    /// Inference boundary configuration
    pub inference: InferenceConfig,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(port: u16, database_path: PathBuf, inference: InferenceConfig) -> Self {
        Self {
            port,
            database_path,
            inference,
        }
    }
}

/// Shared server state
pub struct ServerState {
    /// The assembled signal pipeline
    pipeline: Pipeline,
}

impl ServerState {
    /// Create new server state, opening the database at the configured path.
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let db = Database::open(&config.database_path)?;
        Ok(Self {
            pipeline: Pipeline::new(db, config.inference.clone()),
        })
    }
}

/// Response from the ingest endpoint
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub id: uuid::Uuid,
}

/// Query parameters for the recent endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentQuery {
    pub patient_id: String,
    pub channel: String,
    pub since_ms: Option<i64>,
}

/// Request body for the extract endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub patient_id: String,
    pub channel: String,
    pub model_version: Option<String>,
}

/// Response from the extract endpoint.
///
/// `prediction` is null with `inferenceError` set when the features were
/// computed and persisted but the inference boundary was unavailable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_end: chrono::DateTime<chrono::Utc>,
    pub features: FeatureSet,
    pub prediction: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_error: Option<String>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(e: PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, error, code) = match e {
        PipelineError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg, "INVALID_INPUT"),
        PipelineError::NoData => (
            StatusCode::NOT_FOUND,
            "no-data".to_string(),
            "NO_DATA",
        ),
        PipelineError::EmptyWindow => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "empty-chunk".to_string(),
            "EMPTY_WINDOW",
        ),
        PipelineError::Persistence(err) => {
            tracing::error!("store failure: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                "STORE_ERROR",
            )
        }
    };

    (
        status,
        Json(ErrorResponse {
            error,
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /v1/stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsSnapshot> {
    Json(state.pipeline.stats())
}

/// POST /v1/ingest
///
/// Validates the chunk at the boundary and stores it durably. No
/// deduplication: identical submissions produce distinct chunks.
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorResponse>)> {
    let chunk = state.pipeline.ingest(request).map_err(error_response)?;

    Ok(Json(IngestResponse {
        ok: true,
        id: chunk.id,
    }))
}

/// GET /v1/recent
///
/// Chunks from the last `sinceMs` milliseconds (default 60000), ascending by
/// start time, never more than 200 entries.
async fn recent(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<SignalChunk>>, (StatusCode, Json<ErrorResponse>)> {
    let chunks = state
        .pipeline
        .recent(&query.patient_id, &query.channel, query.since_ms)
        .map_err(error_response)?;

    Ok(Json(chunks))
}

/// POST /v1/extract
///
/// Runs the full pass: select the latest window, compute features, persist
/// them, call the inference boundary. An inference failure after the feature
/// write still returns 200 with the features and a null prediction.
async fn extract(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, (StatusCode, Json<ErrorResponse>)> {
    let extraction = state
        .pipeline
        .extract_and_predict(
            &request.patient_id,
            &request.channel,
            request.model_version.as_deref(),
        )
        .await
        .map_err(error_response)?;

    let (prediction, inference_error) = match extraction.prediction {
        PredictionOutcome::Predicted(payload) => (Some(payload), None),
        PredictionOutcome::Unavailable(e) => (None, Some(e.to_string())),
    };

    Ok(Json(ExtractResponse {
        window_start: extraction.window_start,
        window_end: extraction.window_end,
        features: extraction.features,
        prediction,
        inference_error,
    }))
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/stats", get(stats))
        .route("/v1/ingest", post(ingest))
        .route("/v1/recent", get(recent))
        .route("/v1/extract", post(extract))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Signal service listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
