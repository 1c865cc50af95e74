//! Route handlers for the ask surface.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
};

use sibyl_core::JobId;
use sibyl_infra::JobStoreError;

use crate::app::{AppState, dto, errors};

pub async fn health() -> axum::response::Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// `POST /ask`: accept a question and hand back a pollable job id.
pub async fn ask(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<dto::AskRequest>,
) -> axum::response::Response {
    match state.submitter.submit(&body.question).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(dto::JobCreateResponse::accepted(job_id)),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// `GET /ask/{job_id}`: status and result, if available.
pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match state.store.get(job_id).await {
        Ok(job) => Json(dto::JobResultResponse::from(job)).into_response(),
        Err(JobStoreError::NotFound(_)) => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found")
        }
        Err(e) => {
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}
