//! Error-to-response mapping.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use sibyl_core::DomainError;
use sibyl_infra::{JobStoreError, SubmitError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(DomainError::Validation(msg)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        SubmitError::Validation(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
        }
        SubmitError::Store(JobStoreError::DuplicateId(id)) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "duplicate_id",
            format!("job id collision: {id}"),
        ),
        SubmitError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        SubmitError::Publish { .. } => json_error(
            StatusCode::BAD_GATEWAY,
            "publish_error",
            "Failed to queue the question for processing. Please try again later.",
        ),
    }
}
