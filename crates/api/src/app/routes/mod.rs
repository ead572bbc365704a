use axum::{
    Router,
    routing::{get, post},
};

use crate::app::AppState;

pub mod jobs;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/process-batch", post(jobs::process_batch))
        .route("/jobs/stats", get(jobs::stats))
}
