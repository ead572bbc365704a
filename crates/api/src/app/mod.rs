//! HTTP API application wiring (Axum router + shared state).
//!
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Router, routing::get};
use tower::ServiceBuilder;

use lotwise_ai::CompletionClient;
use lotwise_infra::jobs::{JobProcessor, JobStore};
use lotwise_infra::usage::UsageLedger;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Processor over type-erased collaborators, so one router serves every backend.
pub type SharedProcessor =
    JobProcessor<Arc<dyn JobStore>, Arc<dyn CompletionClient>, Arc<dyn UsageLedger>>;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<SharedProcessor>,
    pub batch_limits: BatchLimits,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BatchLimits {
    pub default_size: usize,
    pub max_size: usize,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState, worker_token: impl Into<Arc<str>>) -> Router {
    let auth_state = middleware::AuthState {
        worker_token: worker_token.into(),
    };

    // Protected routes: require the worker bearer token.
    let protected = routes::router()
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
