use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use lotwise_infra::jobs::JobStore;

use crate::app::AppState;
use crate::app::dto::{
    JobStatsResponse, ProcessBatchQuery, ProcessBatchRequest, ProcessBatchResponse,
    resolve_batch_size,
};
use crate::app::errors::{json_error, process_error_to_response, store_error_to_response};

/// `POST /jobs/process-batch`
///
/// The batch size comes from the JSON body (`{"batchSize": n}`) or the
/// `batchSize` query parameter; an empty body is allowed.
pub async fn process_batch(
    State(state): State<AppState>,
    query: Result<Query<ProcessBatchQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let query = match query {
        Ok(Query(q)) => q,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_batch_size", e.body_text()),
    };

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessBatchRequest::default()
    } else {
        match serde_json::from_slice::<ProcessBatchRequest>(&body) {
            Ok(r) => r,
            Err(e) => {
                return json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string());
            }
        }
    };

    let limits = state.batch_limits;
    let batch_size = match resolve_batch_size(request.batch_size, query.batch_size, limits) {
        Ok(n) => n,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, "invalid_batch_size", msg),
    };

    match state.processor.process_batch(batch_size).await {
        Ok(report) => {
            info!(batch_size, processed = report.processed, "process-batch request served");
            (StatusCode::OK, Json(ProcessBatchResponse::from(report))).into_response()
        }
        Err(e) => process_error_to_response(e),
    }
}

/// `GET /jobs/stats`
pub async fn stats(State(state): State<AppState>) -> Response {
    match state.processor.store().stats().await {
        Ok(stats) => (StatusCode::OK, Json(JobStatsResponse::from(stats))).into_response(),
        Err(e) => store_error_to_response(e),
    }
}
