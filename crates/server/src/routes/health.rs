//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker_connected: bool,
    pub bus_initialized: bool,
}

/// `GET /health`: reports whether the bus can publish.
///
/// Always answers 200. A broker outage shows as `"degraded"` until the bus
/// supervisor reconnects and restarts the consumers.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let broker_connected = state.bus.connection().is_connected();
    let bus_initialized = state.bus.is_initialized().await;
    let status = if broker_connected && bus_initialized {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        broker_connected,
        bus_initialized,
    })
}
