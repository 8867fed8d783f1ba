use thiserror::Error;

use crate::model::PageStatus;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the page-lifecycle engine, grouped by kind rather
/// than by source type — several of these wrap more than one underlying
/// cause.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unsupported MIME type, oversize file, or otherwise malformed input.
    /// Surfaced to the caller of ingest; no page is created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// `status` does not admit a transition to the requested state.
    /// Thrown in dev, logged in prod, no state change.
    #[error("cannot transition page from {from:?} to {to:?}")]
    InvalidTransition { from: PageStatus, to: PageStatus },

    /// Underlying object store reported a retry-safe busy condition.
    #[error("store busy: {0}")]
    StoreBusy(String),

    /// Underlying object store reported unrecoverable corruption, or a
    /// referenced row (e.g. a source file) was missing on resume.
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    /// The OCR service rejected admission because it is at capacity.
    #[error("OCR queue is full")]
    QueueFull,

    /// The OCR service is currently unreachable or reporting unhealthy.
    #[error("OCR service unavailable")]
    ServiceUnavailable,

    /// `submitBatch` found no page in a state eligible for OCR submission.
    #[error("no eligible pages in batch")]
    NothingEligible,

    /// `exportDocument` found pages that have not reached `ocr_success`.
    #[error("{0} of {1} pages are not ready for export")]
    SomeNotReady(usize, usize),

    /// A page (or the task bound to it) was cancelled by the caller. Never
    /// surfaced to the user as an error: callers that observe this should
    /// treat the page as having returned to its pre-transition state.
    #[error("operation on page was cancelled")]
    Cancelled,

    /// A render worker or remote collaborator reported a failure.
    #[error("render error: {0}")]
    Render(String),

    /// An OCR transport/server error (any non-2xx response, or a network
    /// failure while awaiting the OCR response).
    #[error("OCR error: {0}")]
    Ocr(String),

    /// An artifact-generation error (Markdown/DOCX/searchable-PDF assembly).
    #[error("generation error: {0}")]
    Generation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// Retry was requested on a page that is not at `error`, or whose
    /// `pre_error_status` does not correspond to a known retryable stage.
    #[error("page is not retryable: {0}")]
    NotRetryable(String),
}
