//! Resume Controller: walks in-flight pages on boot and re-admits them
//! to the right queue. Each in-flight page is individually reset to its
//! pending predecessor and re-queued, since the underlying artifacts it
//! needs are still on disk.

use std::sync::Arc;

use scan2doc_core::error::CoreResult;
use scan2doc_core::model::{LogLevel, OcrMode, PageStatus};
use scan2doc_core::page_store::PageStore;
use scan2doc_core::store_api::ObjectStore;

use crate::docgen::DocGenCoordinator;
use crate::ocr::OcrCoordinator;
use crate::render::RenderCoordinator;

pub struct ResumeController;

impl ResumeController {
    /// Loads the in-memory projection from the store, then walks every
    /// page currently in an in-flight status and either re-admits it or
    /// marks it `error` if its prerequisite artifact is gone.
    pub async fn run(
        store: &Arc<dyn ObjectStore>,
        pages: &Arc<PageStore>,
        render: &Arc<RenderCoordinator>,
        ocr: &Arc<OcrCoordinator>,
        docgen: &Arc<DocGenCoordinator>,
    ) -> CoreResult<()> {
        pages.load_from_store().await?;

        for page in pages.pages().await {
            let page_id = page.id;
            match page.status {
                PageStatus::Rendering => {
                    pages.revert_to(page_id, PageStatus::PendingRender).await?;
                    Self::readmit_render(store, pages, render, page_id).await;
                }
                PageStatus::PendingRender => {
                    Self::readmit_render(store, pages, render, page_id).await;
                }
                PageStatus::Recognizing => {
                    pages.revert_to(page_id, PageStatus::PendingOcr).await?;
                    ocr.resume_readmit(page_id, OcrMode::Document).await;
                }
                PageStatus::PendingOcr => {
                    ocr.resume_readmit(page_id, OcrMode::Document).await;
                }
                PageStatus::GeneratingMarkdown => {
                    pages.revert_to(page_id, PageStatus::PendingGen).await?;
                    docgen.resume_readmit(page_id).await;
                }
                PageStatus::GeneratingPdf => {
                    pages.revert_to(page_id, PageStatus::MarkdownSuccess).await?;
                    docgen.resume_readmit(page_id).await;
                }
                PageStatus::GeneratingDocx => {
                    pages.revert_to(page_id, PageStatus::PdfSuccess).await?;
                    docgen.resume_readmit(page_id).await;
                }
                PageStatus::PendingGen => {
                    docgen.resume_readmit(page_id).await;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Re-admits a render task, provided the bytes it needs are still
    /// present: the source file for a PDF page, or the uploaded bytes
    /// for a plain image. Either missing is a permanent I/O error per
    /// spec — the page is marked `error` with a descriptive log rather
    /// than retried.
    async fn readmit_render(
        store: &Arc<dyn ObjectStore>,
        pages: &Arc<PageStore>,
        render: &Arc<RenderCoordinator>,
        page_id: scan2doc_core::model::PageId,
    ) {
        let Some(page) = pages.get(page_id).await else {
            return;
        };

        let artifact_present = match page.source_file_id {
            Some(source_file_id) => matches!(store.get_file(source_file_id).await, Ok(Some(_))),
            None => matches!(store.get_image(page_id).await, Ok(Some(_))),
        };

        if artifact_present {
            render.submit(page_id).await;
        } else {
            tracing::warn!(%page_id, "source artifact missing on resume, marking page as error");
            let _ = pages
                .append_log(page_id, LogLevel::Error, "source file missing on resume")
                .await;
            let _ = pages.update_status(page_id, PageStatus::Error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan2doc_core::error::CoreResult as CR;
    use scan2doc_core::event_bus::EventBus;
    use scan2doc_core::health::{HealthMonitor, HealthProbe, ProbeOutcome};
    use scan2doc_core::model::{
        ArtifactFormat, ExtractedImage, Origin, OcrRecord, Page, PageArtifact, PageId, PageImage, SourceFile,
        SourceFileId,
    };
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
        files: StdMutex<HashMap<SourceFileId, SourceFile>>,
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
            Ok(self.pages.lock().unwrap().values().filter(|p| p.status == status).cloned().collect())
        }
        async fn delete_page(&self, id: PageId) -> CR<()> {
            self.pages.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn update_pages_order(&self, _updates: &[(PageId, i64)]) -> CR<()> {
            Ok(())
        }
        async fn save_file(&self, file: &SourceFile) -> CR<()> {
            self.files.lock().unwrap().insert(file.id, file.clone());
            Ok(())
        }
        async fn get_file(&self, id: SourceFileId) -> CR<Option<SourceFile>> {
            Ok(self.files.lock().unwrap().get(&id).cloned())
        }
        async fn delete_file(&self, id: SourceFileId) -> CR<()> {
            self.files.lock().unwrap().remove(&id);
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
                text: "resumed".into(),
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
    async fn rendering_page_is_reset_to_pending_render_and_readmitted() {
        let h = harness().await;
        let source_file_id = SourceFileId::new();
        h.store
            .save_file(&SourceFile {
                id: source_file_id,
                filename: "doc.pdf".into(),
                byte_size: 3,
                content: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let mut page = Page::new_pdf_page("doc.pdf".into(), source_file_id, 0, 0);
        page.status = PageStatus::Rendering;
        let page_id = page.id;
        h.store.save_page(&page).await.unwrap();

        ResumeController::run(&h.store, &h.pages, &h.render, &h.ocr, &h.docgen)
            .await
            .unwrap();

        // A render was submitted; since no bytes are cached for pdfium in
        // this harness it will eventually fail, but the status must not
        // remain at the crash-time `rendering` value after the reset step.
        let reloaded = h.pages.get(page_id).await.unwrap();
        assert_ne!(reloaded.status, PageStatus::Rendering);
    }

    #[tokio::test]
    async fn pending_render_page_with_missing_source_file_becomes_error() {
        let h = harness().await;
        let missing_source = SourceFileId::new();
        let mut page = Page::new_pdf_page("gone.pdf".into(), missing_source, 0, 0);
        page.status = PageStatus::PendingRender;
        let page_id = page.id;
        h.store.save_page(&page).await.unwrap();

        ResumeController::run(&h.store, &h.pages, &h.render, &h.ocr, &h.docgen)
            .await
            .unwrap();

        let reloaded = h.pages.get(page_id).await.unwrap();
        assert_eq!(reloaded.status, PageStatus::Error);
        assert!(reloaded.log.iter().any(|entry| entry.message.contains("missing")));
    }

    #[tokio::test]
    async fn recognizing_page_is_reset_and_reaches_ocr_success_again() {
        let h = harness().await;
        let mut page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        page.origin = Origin::UploadImage;
        page.status = PageStatus::Recognizing;
        let page_id = page.id;
        h.store.save_page(&page).await.unwrap();
        h.store
            .save_image(&PageImage { page_id, blob: vec![1, 2, 3], width: 10, height: 10 })
            .await
            .unwrap();

        ResumeController::run(&h.store, &h.pages, &h.render, &h.ocr, &h.docgen)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reloaded = h.pages.get(page_id).await.unwrap();
        assert_eq!(reloaded.status, PageStatus::OcrSuccess);
        assert_eq!(reloaded.ocr_text.as_deref(), Some("resumed"));
    }
}
