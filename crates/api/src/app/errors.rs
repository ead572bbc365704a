use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use lotwise_infra::jobs::{JobStoreError, ProcessError};

pub fn process_error_to_response(err: ProcessError) -> axum::response::Response {
    error!(error = %err, "batch processing aborted");
    match err {
        ProcessError::Store(e) => store_error_to_response(e),
        ProcessError::Ledger(e) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "persistence_error",
            e.to_string(),
        ),
        ProcessError::Domain(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            e.to_string(),
        ),
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        other => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "persistence_error",
            other.to_string(),
        ),
    }
}

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
