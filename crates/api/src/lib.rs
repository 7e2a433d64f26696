//! Operator HTTP surface for the coordination services.
//!
//! Exposes health, Prometheus metrics, outbox administration and
//! operation status lookup, with structured logging (tracing).

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use operations::OperationStore;
use outbox::OutboxStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub outbox: Arc<dyn OutboxStore>,
    pub operations: Arc<dyn OperationStore>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/outbox/stats", get(routes::outbox::stats))
        .route("/outbox/failed", get(routes::outbox::failed))
        .route("/outbox/retry/{id}", post(routes::outbox::retry))
        .route("/outbox/cancel/{id}", post(routes::outbox::cancel))
        .route("/outbox/retryall", post(routes::outbox::retry_all))
        .route("/operations/{id}", get(routes::operations::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
