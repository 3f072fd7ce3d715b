use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::IngestError;
use crate::generator::generate_batch;
use crate::models::{ActivityType, ApiResponse, IngestReport};
use crate::pipeline::Ingestor;
use crate::source::DirectorySource;
use crate::warehouse::Warehouse;

/// Shared state for the HTTP API.
/// The warehouse connection is not `Sync`, so requests take turns on it.
#[derive(Clone)]
pub struct AppState {
    pub bucket: String,
    pub data_dir: PathBuf,
    pub warehouse: Arc<Mutex<Warehouse>>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationInput {
    pub bucket: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerateInput {
    pub users: Option<usize>,
    pub seed: Option<u64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ingest", post(ingest))
        .route("/ingest/notify", post(ingest_notification))
        .route("/generate", post(generate))
        .route("/sessions/:activity", get(get_sessions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    concat!("Activity Sessions API v", env!("CARGO_PKG_VERSION"))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn run_ingestion<F>(state: &AppState, run: F) -> Result<IngestReport, IngestError>
where
    F: FnOnce(&Ingestor<'_>) -> Result<IngestReport, IngestError>,
{
    let warehouse = state
        .warehouse
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let source = DirectorySource::new(&state.data_dir);
    let ingestor = Ingestor::new(&state.bucket, &source, &*warehouse, &*warehouse);
    run(&ingestor)
}

/// Run SQLite and filesystem work off the async runtime threads
async fn blocking<T, F>(work: F) -> Result<T, StatusCode>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!(error = %e, "blocking task failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ApiResponse>) {
    (
        status,
        Json(ApiResponse {
            status: "error".to_string(),
            message,
            data: None,
        }),
    )
}

fn report_response(result: Result<IngestReport, IngestError>) -> Result<Json<ApiResponse>, StatusCode> {
    match result {
        Ok(report) => Ok(Json(ApiResponse {
            status: "success".to_string(),
            message: report.status.clone(),
            data: serde_json::to_value(&report).ok(),
        })),
        Err(e) => {
            error!(error = %e, "ingestion failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Ingest every batch that is not in the processing log yet
async fn ingest(State(state): State<AppState>) -> Result<Json<ApiResponse>, StatusCode> {
    let result = blocking(move || run_ingestion(&state, |ingestor| ingestor.ingest_new_batches())).await?;
    report_response(result)
}

/// Ingest the single batch named by a storage notification
async fn ingest_notification(
    State(state): State<AppState>,
    Json(input): Json<NotificationInput>,
) -> Result<Json<ApiResponse>, StatusCode> {
    let result = blocking(move || {
        run_ingestion(&state, |ingestor| {
            ingestor.ingest_notification(&input.bucket, &input.name)
        })
    })
    .await?;
    report_response(result)
}

/// Write a synthetic batch into the data directory
async fn generate(
    State(state): State<AppState>,
    input: Option<Json<GenerateInput>>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let seed = input.seed.unwrap_or_else(|| Utc::now().timestamp().unsigned_abs());
    let users = input.users.unwrap_or(100);
    let start = input.start_date.unwrap_or_else(|| "2023-01-01".to_string());
    let end = input.end_date.unwrap_or_else(|| "2023-01-31".to_string());

    let result = blocking(move || generate_batch(&state.data_dir, &start, &end, users, seed))
        .await
        .map_err(|status| error_response(status, "generation task failed".to_string()))?;

    match result {
        Ok(batch) => Ok(Json(ApiResponse {
            status: "success".to_string(),
            message: format!("Uploaded generated table to: {batch}"),
            data: Some(serde_json::json!({ "batch": batch, "seed": seed })),
        })),
        Err(e @ IngestError::Date(_)) => Err(error_response(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            error!(error = %e, "generation failed");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Stored sessions for one activity type
async fn get_sessions(
    State(state): State<AppState>,
    Path(activity): Path<String>,
) -> Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)> {
    let activity: ActivityType = activity
        .parse()
        .map_err(|e: crate::error::ExtractError| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    let result = blocking(move || {
        let warehouse = state
            .warehouse
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        warehouse.sessions(activity)
    })
    .await
    .map_err(|status| error_response(status, "session query task failed".to_string()))?;

    match result {
        Ok(sessions) => Ok(Json(ApiResponse {
            status: "success".to_string(),
            message: format!("{} {} sessions", sessions.len(), activity),
            data: Some(serde_json::json!({
                "sessions": sessions,
                "count": sessions.len(),
            })),
        })),
        Err(e) => {
            error!(error = %e, "reading sessions failed");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
