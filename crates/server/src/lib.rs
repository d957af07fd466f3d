//! Composition root for the order fulfillment pipeline.
//!
//! Wires the event bus, job scheduler, cache and handlers from
//! configuration, and serves health, metrics, cache statistics and
//! dead-letter triage over HTTP.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use cache::CacheStatistics;
use messaging::{EventBus, FailedMessageStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pipeline::Pipeline;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub cache_statistics: Arc<CacheStatistics>,
    pub failed_messages: Arc<dyn FailedMessageStore>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn from_pipeline(pipeline: &Pipeline, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            bus: Arc::clone(&pipeline.bus),
            cache_statistics: Arc::clone(&pipeline.cache_statistics),
            failed_messages: Arc::clone(&pipeline.failed_messages),
            metrics,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::get))
        .route("/cache/stats", get(routes::cache::stats))
        .route("/failed-messages", get(routes::failed_messages::list))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
