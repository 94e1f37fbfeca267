//! Submission API handlers
//!
//! The HTTP surface is thin: a liveness probe, a dataset-catalog refresh
//! trigger, and the multipart submission endpoint that persists uploaded
//! sources and hands the pipeline to the manager.

use std::path::Path;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::settings::{METADATA_FILENAME, PIPELINE_FILENAME};

use super::state::AppState;

/// Uploads up to 512 MB per submission.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ApiStatus {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
}

/// Build the submission router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/datasets/update/", get(update_datasets))
        .route("/submit/", post(submit))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn root() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "success".to_string(),
        message: "ML pipeline placement system".to_string(),
    })
}

/// Trigger a dataset catalog refresh.
async fn update_datasets(State(state): State<AppState>) -> (StatusCode, Json<ApiStatus>) {
    match state.catalog.refresh() {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiStatus {
                status: "success".to_string(),
                message: format!("{} dataset(s) registered", state.catalog.len()),
            }),
        ),
        Err(e) => {
            error!("Dataset refresh failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiStatus {
                    status: "error".to_string(),
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// Accept a multipart pipeline submission.
///
/// Expected parts: `components` (repeated, one per component source file),
/// `pipeline` (the build script) and `metadata` (JSON). All files are
/// persisted under `<pipelines_dir>/<fresh id>/` before the pipeline is
/// queued.
async fn submit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> (StatusCode, Json<SubmitResponse>) {
    let pipeline_id = Uuid::new_v4().to_string();
    match handle_submission(&state, &pipeline_id, multipart).await {
        Ok(n_components) => {
            info!("Pipeline {} submitted with {} component(s)", pipeline_id, n_components);
            (
                StatusCode::OK,
                Json(SubmitResponse {
                    status: "success".to_string(),
                    message: format!("{n_components} component(s) received"),
                    pipeline_id: Some(pipeline_id),
                }),
            )
        }
        Err(message) => {
            error!("Submission {} rejected: {}", pipeline_id, message);
            (
                StatusCode::BAD_REQUEST,
                Json(SubmitResponse {
                    status: "error".to_string(),
                    message,
                    pipeline_id: None,
                }),
            )
        }
    }
}

async fn handle_submission(
    state: &AppState,
    pipeline_id: &str,
    mut multipart: Multipart,
) -> Result<usize, String> {
    let dir = state.pipelines_dir.join(pipeline_id);
    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;

    let mut components: Vec<(String, String)> = Vec::new();
    let mut pipeline_name: Option<String> = None;
    let mut has_build_script = false;
    let mut has_metadata = false;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let part_name = field.name().map(str::to_string);
        match part_name.as_deref() {
            Some("components") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| "component part without a filename".to_string())?;
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                std::fs::write(dir.join(&filename), &bytes).map_err(|e| e.to_string())?;
                let canonical = canonical_component_name(&filename);
                components.push((filename, canonical));
            }
            Some("pipeline") => {
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                std::fs::write(dir.join(PIPELINE_FILENAME), &bytes).map_err(|e| e.to_string())?;
                has_build_script = true;
            }
            Some("metadata") => {
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                pipeline_name = serde_json::from_slice::<Value>(&bytes)
                    .ok()
                    .and_then(|v| v.get("name").and_then(Value::as_str).map(str::to_string));
                std::fs::write(dir.join(METADATA_FILENAME), &bytes).map_err(|e| e.to_string())?;
                has_metadata = true;
            }
            _ => {}
        }
    }

    if !has_build_script {
        return Err("missing 'pipeline' part".to_string());
    }
    if !has_metadata {
        return Err("missing 'metadata' part".to_string());
    }

    let name = pipeline_name.unwrap_or_else(|| pipeline_id.to_string());
    state
        .manager
        .add_pipeline(pipeline_id, &name, &components)
        .await
        .map_err(|e| e.to_string())?;

    Ok(components.len())
}

/// Canonical component name: filename stem, lowercased, underscores
/// replaced by hyphens. Matches the display names the backend assigns to
/// workflow tasks.
pub fn canonical_component_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase().replace('_', "-"))
        .unwrap_or_default()
}
