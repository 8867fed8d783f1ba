use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub is_available: bool,
    pub is_full: bool,
    pub degraded: bool,
    pub queue_depth: u32,
    pub max_size: u32,
}

/// Synchronous, possibly up-to-one-poll-cycle-stale passthrough of the
/// remote OCR service's health, as observed by the background monitor.
pub async fn current_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.health.current();
    Json(HealthResponse {
        is_available: status.is_available,
        is_full: status.is_full,
        degraded: status.degraded(),
        queue_depth: status.queue_depth,
        max_size: status.max_size,
    })
}
