use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use scan2doc_core::CoreError;

/// API error type that converts to JSON responses. Maps [`CoreError`]
/// variants onto HTTP status per their error-taxonomy kind: validation
/// to 400, transient/remote-state conditions to 409/503, everything
/// else to 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ApiError::Core(err) => return core_error_response(err),
        };

        let body = axum::Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

fn core_error_response(err: &CoreError) -> Response {
    let status = match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CoreError::StoreBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::NothingEligible => StatusCode::CONFLICT,
        CoreError::SomeNotReady(..) => StatusCode::CONFLICT,
        CoreError::Cancelled => StatusCode::CONFLICT,
        CoreError::NotRetryable(_) => StatusCode::CONFLICT,
        CoreError::StoreCorrupt(_)
        | CoreError::Render(_)
        | CoreError::Ocr(_)
        | CoreError::Generation(_)
        | CoreError::Io(_)
        | CoreError::Serde(_)
        | CoreError::Config(_) => {
            tracing::error!(error = %err, "internal error");
            debug_assert!(false, "unexpected internal error: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, axum::Json(ErrorResponse { error: err.to_string() })).into_response()
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
