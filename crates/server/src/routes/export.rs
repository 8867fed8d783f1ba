use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use scan2doc_core::model::{ArtifactFormat, PageId};

use crate::docgen::ExportOutcome;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExportRequest {
    pub page_ids: Vec<Uuid>,
    pub format: ArtifactFormat,
}

/// Exports the requested pages, concatenated in `order`, as `format`, as
/// a single merged direct-download response. A page set with any page
/// not yet past `ocr_success` returns 409 with the not-ready count so
/// the caller can prompt the user to skip those pages rather than
/// silently dropping them.
pub async fn export_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let ids: Vec<PageId> = req.page_ids.into_iter().map(PageId).collect();
    match state.docgen.export_document(&ids, req.format).await? {
        ExportOutcome::Ready { bytes, mime_type, filename } => Ok((
            [
                (header::CONTENT_TYPE, mime_type.to_string()),
                (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
            ],
            bytes,
        )
            .into_response()),
        ExportOutcome::SomeNotReady { not_ready, total } => Ok((
            axum::http::StatusCode::CONFLICT,
            Json(serde_json::json!({ "not_ready": not_ready, "total": total })),
        )
            .into_response()),
    }
}
