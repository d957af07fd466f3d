//! Dead-letter triage endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use messaging::FailedMessage;

use crate::AppState;
use crate::error::ApiError;

/// `GET /failed-messages`: dead-lettered messages not yet replayed, oldest
/// first.
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<FailedMessage>>, ApiError> {
    let messages = state.failed_messages.list_unprocessed().await?;
    Ok(Json(messages))
}
