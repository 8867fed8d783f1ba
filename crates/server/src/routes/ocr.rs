use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scan2doc_core::model::{OcrMode, PageId};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TriggerOcrRequest {
    #[serde(default)]
    pub mode: Option<OcrMode>,
}

pub async fn trigger_ocr(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerOcrRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mode = req.mode.unwrap_or(OcrMode::Document);
    state.ocr.submit(PageId(id), mode).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct BatchOcrRequest {
    pub page_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct BatchOcrResponse {
    pub admitted: usize,
    pub skipped: usize,
}

pub async fn trigger_batch_ocr(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchOcrRequest>,
) -> Result<Json<BatchOcrResponse>, ApiError> {
    let ids: Vec<PageId> = req.page_ids.into_iter().map(PageId).collect();
    let outcome = state.ocr.submit_batch(&ids).await?;
    Ok(Json(BatchOcrResponse { admitted: outcome.admitted, skipped: outcome.skipped }))
}
