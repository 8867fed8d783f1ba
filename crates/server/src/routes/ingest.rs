use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;

use scan2doc_core::model::Page;

use crate::error::ApiError;
use crate::ingest::{IncomingFile, IngestOpts};
use crate::state::AppState;

#[derive(Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub pages: Vec<Page>,
    pub error: Option<String>,
}

/// Accepts one or more `file` parts (images or PDFs) in a single
/// multipart body, preserving the order fields arrived in, and fans
/// each one out through the Ingestor.
pub async fn ingest_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let mut files = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let media_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read uploaded file: {e}")))?;
        files.push(IncomingFile { filename, media_type, bytes: bytes.to_vec() });
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no files provided".to_string()));
    }

    let result = state.ingestor.ingest_files(files, IngestOpts::default()).await;

    Ok(Json(IngestResponse {
        success: result.success,
        pages: result.pages,
        error: result.error,
    }))
}
