//! The seam between the page-lifecycle engine and the Object Store.
//! `scan2doc-store` provides the concrete `rusqlite`-backed implementation;
//! everything in this crate only ever talks to the trait, so
//! [`crate::page_store::PageStore`] can be exercised in tests against an
//! in-memory fake without pulling in a database.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{ArtifactFormat, ExtractedImage, OcrRecord, Page, PageArtifact, PageId, PageImage, PageStatus, SourceFile, SourceFileId};

/// Contract for the transactional embedded object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A strictly monotonic integer via one atomic read-modify-write.
    /// Concurrent callers receive distinct values.
    async fn get_next_order(&self) -> CoreResult<i64>;

    /// Reserve `count` contiguous order values in one atomic operation,
    /// returning the first value of the range.
    async fn reserve_order_range(&self, count: i64) -> CoreResult<i64>;

    async fn save_page(&self, page: &Page) -> CoreResult<()>;
    async fn get_page(&self, id: PageId) -> CoreResult<Option<Page>>;
    async fn get_all_pages_for_display(&self) -> CoreResult<Vec<Page>>;
    async fn get_pages_by_status(&self, status: PageStatus) -> CoreResult<Vec<Page>>;

    /// Cascades to `page_images`, `page_artifacts`, `page_extracted_images`,
    /// `page_ocr` for this page in the same transaction.
    async fn delete_page(&self, id: PageId) -> CoreResult<()>;

    /// Apply all `(id, order)` updates in one transaction.
    async fn update_pages_order(&self, updates: &[(PageId, i64)]) -> CoreResult<()>;

    async fn save_file(&self, file: &SourceFile) -> CoreResult<()>;
    async fn get_file(&self, id: SourceFileId) -> CoreResult<Option<SourceFile>>;
    async fn delete_file(&self, id: SourceFileId) -> CoreResult<()>;

    async fn save_image(&self, image: &PageImage) -> CoreResult<()>;
    async fn get_image(&self, page_id: PageId) -> CoreResult<Option<PageImage>>;

    async fn save_artifact(&self, artifact: &PageArtifact) -> CoreResult<()>;
    async fn get_artifact(&self, page_id: PageId, format: ArtifactFormat) -> CoreResult<Option<PageArtifact>>;

    async fn save_extracted_image(&self, image: &ExtractedImage) -> CoreResult<()>;
    async fn get_extracted_images(&self, page_id: PageId) -> CoreResult<Vec<ExtractedImage>>;

    /// Persists the raw OCR response verbatim, keyed by page. Separate
    /// from `pages` so the page-list query never has to load OCR boxes.
    async fn save_ocr_record(&self, page_id: PageId, record: &OcrRecord) -> CoreResult<()>;
    async fn get_ocr_record(&self, page_id: PageId) -> CoreResult<Option<OcrRecord>>;

    async fn clear_all_data(&self) -> CoreResult<()>;
}
