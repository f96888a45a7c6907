//! HTTP route handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer};

use crate::service::{HealthSnapshot, IngestService, SubmitError, SubmitRequest};
use crate::source::SourceBlob;
use crate::task::TaskId;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub workflow_code: String,
    #[serde(default)]
    pub file_type: String,
    pub file_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_location")]
    pub location: Option<String>,
    pub experiment_name: Option<String>,
    /// Path of the uploaded file, relative to the upload root.
    pub source_path: Option<String>,
}

/// Locations are numeric ids in most clients; accept either form.
fn deserialize_location<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl From<UploadRequest> for SubmitRequest {
    fn from(request: UploadRequest) -> Self {
        Self {
            id: request.id.filter(|id| !id.is_empty()).map(TaskId::new),
            workflow: request.workflow_code,
            file_kind: request.file_type,
            file_name: request.file_name,
            location: request.location,
            experiment_name: request.experiment_name,
            source: request
                .source_path
                .filter(|p| !p.is_empty())
                .map(|p| SourceBlob::Path(PathBuf::from(p))),
        }
    }
}

async fn health_check(State(service): State<Arc<IngestService>>) -> Json<HealthSnapshot> {
    Json(service.health())
}

async fn submit_upload(
    State(service): State<Arc<IngestService>>,
    Json(request): Json<UploadRequest>,
) -> impl IntoResponse {
    match service.submit(request.into()) {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "id": id, "status": "queued" })),
        ),
        Err(e) => {
            let status = match e {
                SubmitError::Create(_) | SubmitError::SourceOutsideRoot(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                SubmitError::AlreadyActive { .. } => StatusCode::CONFLICT,
                SubmitError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            };
            tracing::warn!(error = %e, "Upload rejected");
            (status, Json(serde_json::json!({ "error": e.to_string() })))
        }
    }
}

async fn upload_status(
    State(service): State<Arc<IngestService>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match service.status(&TaskId::new(id.clone())) {
        Some(entry) => (StatusCode::OK, Json(serde_json::json!(entry))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "id": id, "status": "unknown" })),
        ),
    }
}

async fn shutdown(State(service): State<Arc<IngestService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<IngestService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/uploads", post(submit_upload))
        .route("/uploads/{id}", get(upload_status))
        .with_state(service)
}
