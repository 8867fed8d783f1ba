use thiserror::Error;

/// Errors from the embedded object store. `Busy` is retry-safe (lock
/// contention on the underlying connection); everything else is fatal
/// for the calling operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store busy: {0}")]
    Busy(String),

    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        if let rusqlite::Error::SqliteFailure(sqlite_err, _) = &err {
            if matches!(sqlite_err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                return StoreError::Busy(err.to_string());
            }
        }
        StoreError::Corrupt(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(format!("row deserialization failed: {err}"))
    }
}

impl From<StoreError> for scan2doc_core::CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy(msg) => scan2doc_core::CoreError::StoreBusy(msg),
            StoreError::Corrupt(msg) => scan2doc_core::CoreError::StoreCorrupt(msg),
        }
    }
}
