//! User-initiated retry of an `error`-stuck page. Replays the last
//! attempted transition recorded in `pre_error_status`, the same
//! per-stage reset-and-readmit mapping the Resume Controller applies on
//! boot (see `resume.rs`), but triggered on demand for one page rather
//! than swept over every in-flight row at startup.

use std::sync::Arc;

use scan2doc_core::error::{CoreError, CoreResult};
use scan2doc_core::model::{OcrMode, PageStatus};
use scan2doc_core::page_store::PageStore;

use crate::docgen::DocGenCoordinator;
use crate::ocr::OcrCoordinator;
use crate::render::RenderCoordinator;

/// Retries `page_id`, provided it is currently `error` and its
/// `pre_error_status` names a stage this controller knows how to
/// re-enter. Retry counts are intentionally not tracked, per spec.
pub async fn retry_page(
    pages: &Arc<PageStore>,
    render: &Arc<RenderCoordinator>,
    ocr: &Arc<OcrCoordinator>,
    docgen: &Arc<DocGenCoordinator>,
    page_id: scan2doc_core::model::PageId,
) -> CoreResult<()> {
    let page = pages
        .get(page_id)
        .await
        .ok_or_else(|| CoreError::StoreCorrupt(format!("page {page_id} not found")))?;

    if page.status != PageStatus::Error {
        return Err(CoreError::NotRetryable(format!(
            "page {page_id} is at {:?}, not error",
            page.status
        )));
    }

    let Some(pre_error) = page.pre_error_status else {
        return Err(CoreError::NotRetryable(format!(
            "page {page_id} has no recorded pre-error status"
        )));
    };

    match pre_error {
        PageStatus::Rendering => {
            pages.revert_to(page_id, PageStatus::PendingRender).await?;
            render.submit(page_id).await;
        }
        PageStatus::Recognizing => {
            pages.revert_to(page_id, PageStatus::Ready).await?;
            ocr.submit(page_id, OcrMode::Document).await?;
        }
        PageStatus::GeneratingMarkdown => {
            pages.revert_to(page_id, PageStatus::PendingGen).await?;
            docgen.submit(page_id).await;
        }
        PageStatus::GeneratingPdf => {
            pages.revert_to(page_id, PageStatus::MarkdownSuccess).await?;
            docgen.resume_readmit(page_id).await;
        }
        PageStatus::GeneratingDocx => {
            pages.revert_to(page_id, PageStatus::PdfSuccess).await?;
            docgen.resume_readmit(page_id).await;
        }
        other => {
            return Err(CoreError::NotRetryable(format!(
                "page {page_id} has no known retry path from {other:?}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan2doc_core::error::CoreResult as CR;
    use scan2doc_core::event_bus::EventBus;
    use scan2doc_core::health::{HealthMonitor, HealthProbe, ProbeOutcome};
    use scan2doc_core::model::{
        ArtifactFormat, ExtractedImage, LogLevel, OcrRecord, Origin, Page, PageArtifact, PageId, PageImage,
        SourceFile, SourceFileId,
    };
    use scan2doc_core::store_api::ObjectStore;
    use scan2doc_core::EngineConfig;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::ocr::OcrClient;
    use crate::render::RenderWorkerPool;

    #[derive(Default)]
    struct FakeStore {
        pages: StdMutex<HashMap<PageId, Page>>,
        images: StdMutex<HashMap<PageId, PageImage>>,
        order: StdMutex<i64>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get_next_order(&self) -> CR<i64> {
            let mut o = self.order.lock().unwrap();
            let v = *o;
            *o += 1;
            Ok(v)
        }
        async fn reserve_order_range(&self, count: i64) -> CR<i64> {
            let mut o = self.order.lock().unwrap();
            let first = *o;
            *o += count;
            Ok(first)
        }
        async fn save_page(&self, page: &Page) -> CR<()> {
            self.pages.lock().unwrap().insert(page.id, page.clone());
            Ok(())
        }
        async fn get_page(&self, id: PageId) -> CR<Option<Page>> {
            Ok(self.pages.lock().unwrap().get(&id).cloned())
        }
        async fn get_all_pages_for_display(&self) -> CR<Vec<Page>> {
            Ok(self.pages.lock().unwrap().values().cloned().collect())
        }
        async fn get_pages_by_status(&self, status: PageStatus) -> CR<Vec<Page>> {
            Ok(self
                .pages
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.status == status)
                .cloned()
                .collect())
        }
        async fn delete_page(&self, id: PageId) -> CR<()> {
            self.pages.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn update_pages_order(&self, _updates: &[(PageId, i64)]) -> CR<()> {
            Ok(())
        }
        async fn save_file(&self, _file: &SourceFile) -> CR<()> {
            Ok(())
        }
        async fn get_file(&self, _id: SourceFileId) -> CR<Option<SourceFile>> {
            Ok(None)
        }
        async fn delete_file(&self, _id: SourceFileId) -> CR<()> {
            Ok(())
        }
        async fn save_image(&self, image: &PageImage) -> CR<()> {
            self.images.lock().unwrap().insert(image.page_id, image.clone());
            Ok(())
        }
        async fn get_image(&self, page_id: PageId) -> CR<Option<PageImage>> {
            Ok(self.images.lock().unwrap().get(&page_id).cloned())
        }
        async fn save_artifact(&self, _artifact: &PageArtifact) -> CR<()> {
            Ok(())
        }
        async fn get_artifact(&self, _page_id: PageId, _format: ArtifactFormat) -> CR<Option<PageArtifact>> {
            Ok(None)
        }
        async fn save_extracted_image(&self, _image: &ExtractedImage) -> CR<()> {
            Ok(())
        }
        async fn get_extracted_images(&self, _page_id: PageId) -> CR<Vec<ExtractedImage>> {
            Ok(vec![])
        }
        async fn save_ocr_record(&self, _page_id: PageId, _record: &OcrRecord) -> CR<()> {
            Ok(())
        }
        async fn get_ocr_record(&self, _page_id: PageId) -> CR<Option<OcrRecord>> {
            Ok(None)
        }
        async fn clear_all_data(&self) -> CR<()> {
            Ok(())
        }
    }

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn probe(&self) -> ProbeOutcome {
            ProbeOutcome::Healthy { queue_depth: 0, max_size: 10 }
        }
    }

    struct FakeOcrClient;
    #[async_trait]
    impl OcrClient for FakeOcrClient {
        async fn recognize(&self, _image_bytes: Vec<u8>, _mode: OcrMode) -> CR<OcrRecord> {
            Ok(OcrRecord {
                text: "retried".into(),
                raw_text: vec![],
                boxes: vec![],
                extra: serde_json::Map::new(),
            })
        }
    }

    struct Harness {
        store: Arc<dyn ObjectStore>,
        pages: Arc<PageStore>,
        render: Arc<RenderCoordinator>,
        ocr: Arc<OcrCoordinator>,
        docgen: Arc<DocGenCoordinator>,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::default());
        let bus = Arc::new(EventBus::new());
        let pages = Arc::new(PageStore::new(store.clone(), bus.clone()));

        let pool = Arc::new(RenderWorkerPool::spawn(1));
        let render = Arc::new(RenderCoordinator::new(pool, 2, store.clone(), pages.clone(), bus.clone(), 256));

        let (health, handle) = HealthMonitor::spawn(Arc::new(AlwaysHealthy), bus.clone(), Duration::from_secs(3600));
        handle.abort();
        let health = Arc::new(health);
        let ocr = Arc::new(OcrCoordinator::new(
            Arc::new(FakeOcrClient),
            2,
            store.clone(),
            pages.clone(),
            bus.clone(),
            health,
        ));

        let docgen = Arc::new(DocGenCoordinator::new(1, store.clone(), pages.clone(), bus.clone(), EngineConfig::default()));

        Harness { store, pages, render, ocr, docgen }
    }

    #[tokio::test]
    async fn retrying_a_page_not_at_error_is_rejected() {
        let h = harness().await;
        let mut page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        page.origin = Origin::UploadImage;
        page.status = PageStatus::Ready;
        let page_id = page.id;
        h.pages.add_page(page).await.unwrap();

        let err = retry_page(&h.pages, &h.render, &h.ocr, &h.docgen, page_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotRetryable(_)));
    }

    #[tokio::test]
    async fn retrying_a_failed_ocr_page_resubmits_and_reaches_ocr_success() {
        let h = harness().await;
        let mut page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        page.origin = Origin::UploadImage;
        page.status = PageStatus::Ready;
        let page_id = page.id;
        h.pages.add_page(page.clone()).await.unwrap();
        h.store
            .save_image(&PageImage { page_id, blob: vec![1, 2, 3], width: 10, height: 10 })
            .await
            .unwrap();

        // Drive the page into `error` out of `recognizing` the same way
        // the OCR Coordinator would on a transport failure, recording
        // `pre_error_status` via the normal transition path.
        h.pages.update_status(page_id, PageStatus::PendingOcr).await.unwrap();
        h.pages.update_status(page_id, PageStatus::Recognizing).await.unwrap();
        h.pages
            .append_log(page_id, LogLevel::Error, "simulated OCR failure")
            .await
            .unwrap();
        h.pages.update_status(page_id, PageStatus::Error).await.unwrap();

        retry_page(&h.pages, &h.render, &h.ocr, &h.docgen, page_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reloaded = h.pages.get(page_id).await.unwrap();
        assert_eq!(reloaded.status, PageStatus::OcrSuccess);
        assert_eq!(reloaded.ocr_text.as_deref(), Some("retried"));
    }
}
