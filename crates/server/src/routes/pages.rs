use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scan2doc_core::model::{Page, PageId};

use crate::error::ApiError;
use crate::retry::retry_page;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PageListResponse {
    pub pages: Vec<Page>,
    pub overall_progress: u8,
}

/// List every page in the current document set, in `order`.
pub async fn list_pages(State(state): State<Arc<AppState>>) -> Json<PageListResponse> {
    let pages = state.pages.pages().await;
    let overall_progress = state.pages.overall_progress().await;
    Json(PageListResponse { pages, overall_progress })
}

pub async fn get_page(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Result<Json<Page>, ApiError> {
    state
        .pages
        .get(PageId(id))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("page {id} not found")))
}

#[derive(Deserialize)]
pub struct DeletePagesRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct DeletePagesResponse {
    pub deleted: usize,
}

/// Deletes pages, cancelling any in-flight render/OCR/generation task on
/// each one first so no task writes to a row that no longer exists.
pub async fn delete_pages(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeletePagesRequest>,
) -> Result<Json<DeletePagesResponse>, ApiError> {
    let ids: Vec<PageId> = req.ids.into_iter().map(PageId).collect();
    for &id in &ids {
        state.render.cancel(id).await;
        state.ocr.cancel(id).await;
    }
    state.pages.delete_pages(&ids).await?;
    Ok(Json(DeletePagesResponse { deleted: ids.len() }))
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub updates: Vec<(Uuid, i64)>,
}

pub async fn reorder_pages(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<PageListResponse>, ApiError> {
    let updates: Vec<(PageId, i64)> = req.updates.into_iter().map(|(id, order)| (PageId(id), order)).collect();
    state.pages.reorder(&updates).await?;
    let pages = state.pages.pages().await;
    let overall_progress = state.pages.overall_progress().await;
    Ok(Json(PageListResponse { pages, overall_progress }))
}

pub async fn select_all(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.pages.select_all().await;
    Json(serde_json::json!({ "success": true }))
}

pub async fn clear_selection(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.pages.clear_selection().await;
    Json(serde_json::json!({ "success": true }))
}

pub async fn toggle_select(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.pages.toggle_select(PageId(id)).await;
    Json(serde_json::json!({ "success": true }))
}

/// Retries a page stuck at `error`, replaying the last attempted
/// transition recorded in `pre_error_status`.
pub async fn retry(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    retry_page(&state.pages, &state.render, &state.ocr, &state.docgen, PageId(id)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
