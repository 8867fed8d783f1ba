//! OCR Coordinator: submits `ready` pages to the remote OCR service
//! through the render queue's sibling bounded queue, gated by the
//! Health Monitor's synchronous admission check. Grounded on the
//! `VisionProvider` trait seam and its `reqwest`-based health check,
//! generalized from a one-shot CLI call into a cancellable queued task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scan2doc_core::error::{CoreError, CoreResult};
use scan2doc_core::event_bus::{Event, EventBus};
use scan2doc_core::health::HealthMonitor;
use scan2doc_core::model::{LogLevel, OcrMode, OcrRecord, Page, PageId, PageStatus};
use scan2doc_core::page_store::PageStore;
use scan2doc_core::queue::BoundedQueue;
use scan2doc_core::store_api::ObjectStore;

/// Transport seam to the remote OCR service. Implemented by
/// [`HttpOcrClient`] in production and by scripted fakes in tests.
#[async_trait]
pub trait OcrClient: Send + Sync {
    async fn recognize(&self, image_bytes: Vec<u8>, mode: OcrMode) -> CoreResult<OcrRecord>;
}

/// `reqwest`-based client hitting the remote OCR service's recognition
/// endpoint with the page image as a base64 payload.
pub struct HttpOcrClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOcrClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build OCR HTTP client");
        Self { http, base_url }
    }
}

#[derive(serde::Serialize)]
struct RecognizeRequest<'a> {
    mode: OcrMode,
    image_base64: &'a str,
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image_bytes: Vec<u8>, mode: OcrMode) -> CoreResult<OcrRecord> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image_bytes);
        let response = self
            .http
            .post(format!("{}/recognize", self.base_url))
            .json(&RecognizeRequest {
                mode,
                image_base64: &encoded,
            })
            .send()
            .await
            .map_err(|e| CoreError::Ocr(format!("request to OCR service failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::Ocr(format!(
                "OCR service returned {}",
                response.status()
            )));
        }

        response
            .json::<OcrRecord>()
            .await
            .map_err(|e| CoreError::Ocr(format!("malformed OCR response: {e}")))
    }
}

/// Outcome of a batch submission: how many pages were admitted versus
/// skipped because they were not in `ready`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSubmitOutcome {
    pub admitted: usize,
    pub skipped: usize,
}

pub struct OcrCoordinator {
    client: Arc<dyn OcrClient>,
    queue: BoundedQueue,
    store: Arc<dyn ObjectStore>,
    pages: Arc<PageStore>,
    bus: Arc<EventBus>,
    health: Arc<HealthMonitor>,
}

impl OcrCoordinator {
    pub fn new(
        client: Arc<dyn OcrClient>,
        concurrency: usize,
        store: Arc<dyn ObjectStore>,
        pages: Arc<PageStore>,
        bus: Arc<EventBus>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            client,
            queue: BoundedQueue::new(concurrency),
            store,
            pages,
            bus,
            health,
        }
    }

    /// Submit one page for OCR. Steps: health pre-check, `ready` ->
    /// `pending_ocr` transition plus `ocr:queued`, then admission onto
    /// the bounded queue. The task itself transitions to `recognizing`
    /// plus `ocr:start` once it actually begins the remote call.
    pub async fn submit(self: &Arc<Self>, page_id: PageId, mode: OcrMode) -> CoreResult<()> {
        self.check_health()?;

        let page = self
            .pages
            .get(page_id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {page_id} not found")))?;
        if page.status != PageStatus::Ready {
            return Err(CoreError::InvalidTransition {
                from: page.status,
                to: PageStatus::PendingOcr,
            });
        }

        self.pages.update_status(page_id, PageStatus::PendingOcr).await?;
        self.bus.publish(Event::OcrQueued { page_id });

        let this = self.clone();
        let result = self
            .queue
            .add(page_id, move |cancel| async move {
                this.run(page_id, mode, cancel).await;
            })
            .await;

        if result.is_err() {
            // Already in flight on this queue; leave the page at
            // pending_ocr, the existing task owns its lifecycle.
            tracing::debug!(%page_id, "OCR task already in flight, skipping re-admission");
        }
        Ok(())
    }

    /// Submit every `ready` page in `page_ids`. A single health check
    /// gates the whole batch; pages not currently `ready` are skipped
    /// rather than failing the call. Returns [`CoreError::NothingEligible`]
    /// if none of the requested pages are eligible.
    pub async fn submit_batch(self: &Arc<Self>, page_ids: &[PageId]) -> CoreResult<BatchSubmitOutcome> {
        self.check_health()?;

        let mut eligible = Vec::new();
        let mut skipped = 0usize;
        for &page_id in page_ids {
            match self.pages.get(page_id).await {
                Some(page) if page.status == PageStatus::Ready => eligible.push(page_id),
                _ => skipped += 1,
            }
        }

        if eligible.is_empty() {
            return Err(CoreError::NothingEligible);
        }

        let mut admitted = 0usize;
        for page_id in eligible {
            self.pages.update_status(page_id, PageStatus::PendingOcr).await?;
            self.bus.publish(Event::OcrQueued { page_id });

            let this = self.clone();
            let result = self
                .queue
                .add(page_id, move |cancel| async move {
                    this.run(page_id, OcrMode::Document, cancel).await;
                })
                .await;
            match result {
                Ok(_) => admitted += 1,
                Err(_) => skipped += 1,
            }
        }

        Ok(BatchSubmitOutcome { admitted, skipped })
    }

    pub async fn cancel(&self, page_id: PageId) {
        self.queue.cancel(page_id).await;
    }

    /// Re-admission entry point for boot resume: the page has already
    /// been reverted to `pending_ocr` (from `recognizing`) by the Resume
    /// Controller, so this skips the `ready -> pending_ocr` transition
    /// and `ocr:queued` event `submit()` would otherwise emit, and goes
    /// straight to queuing the task.
    pub async fn resume_readmit(self: &Arc<Self>, page_id: PageId, mode: OcrMode) {
        let this = self.clone();
        let result = self
            .queue
            .add(page_id, move |cancel| async move {
                this.run(page_id, mode, cancel).await;
            })
            .await;
        if result.is_err() {
            tracing::debug!(%page_id, "OCR task already in flight, skipping resume re-admission");
        }
    }

    fn check_health(&self) -> CoreResult<()> {
        let status = self.health.current();
        if !status.is_available {
            return Err(CoreError::ServiceUnavailable);
        }
        if status.is_full {
            return Err(CoreError::QueueFull);
        }
        Ok(())
    }

    async fn run(&self, page_id: PageId, mode: OcrMode, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            self.revert_silently(page_id).await;
            return;
        }

        let Some(page) = self.pages.get(page_id).await else {
            tracing::warn!(%page_id, "OCR task started for a page that no longer exists");
            return;
        };

        if let Err(err) = self.pages.update_status(page_id, PageStatus::Recognizing).await {
            tracing::error!(%page_id, %err, "failed to transition page to recognizing");
            return;
        }
        self.bus.publish(Event::OcrStart { page_id });

        let image_bytes = match self.load_image_bytes(&page).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail(page_id, err).await;
                return;
            }
        };

        let recognized = tokio::select! {
            result = self.client.recognize(image_bytes, mode) => result,
            _ = cancel.cancelled() => {
                tracing::debug!(%page_id, "OCR cancelled mid-call");
                self.revert_cancelled(page_id).await;
                return;
            }
        };

        match recognized {
            Ok(record) => {
                if let Err(err) = self.pages.set_ocr_result(page_id, &record).await {
                    self.fail(page_id, err).await;
                    return;
                }
                if let Err(err) = self.pages.update_status(page_id, PageStatus::OcrSuccess).await {
                    tracing::error!(%page_id, %err, "failed to transition page to ocr_success");
                    return;
                }
                self.bus.publish(Event::OcrSuccess {
                    page_id,
                    result: Box::new(record),
                });
            }
            Err(err) => self.fail(page_id, err).await,
        }
    }

    async fn load_image_bytes(&self, page: &Page) -> CoreResult<Vec<u8>> {
        self.store
            .get_image(page.id)
            .await?
            .map(|image| image.blob)
            .ok_or_else(|| CoreError::StoreCorrupt(format!("no rendered image for page {}", page.id)))
    }

    async fn fail(&self, page_id: PageId, err: CoreError) {
        tracing::warn!(%page_id, %err, "OCR failed");
        let _ = self.pages.append_log(page_id, LogLevel::Error, err.to_string()).await;
        let _ = self.pages.update_status(page_id, PageStatus::Error).await;
        self.bus.publish(Event::OcrError {
            page_id,
            error: err.to_string(),
        });
    }

    /// Cancelled before the remote call started: release back to `ready`
    /// with no event, as if the submission never happened.
    async fn revert_silently(&self, page_id: PageId) {
        let _ = self.pages.revert_to(page_id, PageStatus::Ready).await;
    }

    /// Cancelled mid-call: the page was already in `recognizing`, so
    /// revert it the same way, and let subscribers know the attempt was
    /// abandoned rather than silently vanishing.
    async fn revert_cancelled(&self, page_id: PageId) {
        let _ = self.pages.revert_to(page_id, PageStatus::Ready).await;
        self.bus.publish(Event::OcrCancel { page_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan2doc_core::health::{HealthProbe, ProbeOutcome};
    use scan2doc_core::model::{ArtifactFormat, ExtractedImage, Origin, PageArtifact, PageImage, SourceFile, SourceFileId};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        pages: StdMutex<HashMap<PageId, Page>>,
        images: StdMutex<HashMap<PageId, PageImage>>,
        order: StdMutex<i64>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get_next_order(&self) -> CoreResult<i64> {
            let mut o = self.order.lock().unwrap();
            let v = *o;
            *o += 1;
            Ok(v)
        }
        async fn reserve_order_range(&self, count: i64) -> CoreResult<i64> {
            let mut o = self.order.lock().unwrap();
            let first = *o;
            *o += count;
            Ok(first)
        }
        async fn save_page(&self, page: &Page) -> CoreResult<()> {
            self.pages.lock().unwrap().insert(page.id, page.clone());
            Ok(())
        }
        async fn get_page(&self, id: PageId) -> CoreResult<Option<Page>> {
            Ok(self.pages.lock().unwrap().get(&id).cloned())
        }
        async fn get_all_pages_for_display(&self) -> CoreResult<Vec<Page>> {
            Ok(self.pages.lock().unwrap().values().cloned().collect())
        }
        async fn get_pages_by_status(&self, status: PageStatus) -> CoreResult<Vec<Page>> {
            Ok(self.pages.lock().unwrap().values().filter(|p| p.status == status).cloned().collect())
        }
        async fn delete_page(&self, id: PageId) -> CoreResult<()> {
            self.pages.lock().unwrap().remove(&id);
            Ok(())
        }
        async fn update_pages_order(&self, _updates: &[(PageId, i64)]) -> CoreResult<()> {
            Ok(())
        }
        async fn save_file(&self, _file: &SourceFile) -> CoreResult<()> {
            Ok(())
        }
        async fn get_file(&self, _id: SourceFileId) -> CoreResult<Option<SourceFile>> {
            Ok(None)
        }
        async fn delete_file(&self, _id: SourceFileId) -> CoreResult<()> {
            Ok(())
        }
        async fn save_image(&self, image: &PageImage) -> CoreResult<()> {
            self.images.lock().unwrap().insert(image.page_id, image.clone());
            Ok(())
        }
        async fn get_image(&self, page_id: PageId) -> CoreResult<Option<PageImage>> {
            Ok(self.images.lock().unwrap().get(&page_id).cloned())
        }
        async fn save_artifact(&self, _artifact: &PageArtifact) -> CoreResult<()> {
            Ok(())
        }
        async fn get_artifact(&self, _page_id: PageId, _format: ArtifactFormat) -> CoreResult<Option<PageArtifact>> {
            Ok(None)
        }
        async fn save_extracted_image(&self, _image: &ExtractedImage) -> CoreResult<()> {
            Ok(())
        }
        async fn get_extracted_images(&self, _page_id: PageId) -> CoreResult<Vec<ExtractedImage>> {
            Ok(vec![])
        }
        async fn save_ocr_record(&self, _page_id: PageId, _record: &OcrRecord) -> CoreResult<()> {
            Ok(())
        }
        async fn get_ocr_record(&self, _page_id: PageId) -> CoreResult<Option<OcrRecord>> {
            Ok(None)
        }
        async fn clear_all_data(&self) -> CoreResult<()> {
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

    struct FakeOcrClient {
        should_fail: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrClient for FakeOcrClient {
        async fn recognize(&self, _image_bytes: Vec<u8>, _mode: OcrMode) -> CoreResult<OcrRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(CoreError::Ocr("simulated failure".into()));
            }
            Ok(OcrRecord {
                text: "hello".into(),
                raw_text: vec![],
                boxes: vec![],
                extra: serde_json::Map::new(),
            })
        }
    }

    async fn setup() -> (Arc<OcrCoordinator>, Arc<PageStore>, Arc<FakeStore>, PageId) {
        let store = Arc::new(FakeStore::default());
        let bus = Arc::new(EventBus::new());
        let pages = Arc::new(PageStore::new(store.clone(), bus.clone()));

        let (health, handle) = HealthMonitor::spawn(Arc::new(AlwaysHealthy), bus.clone(), Duration::from_secs(3600));
        handle.abort();
        let health = Arc::new(health);

        let mut page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        page.origin = Origin::UploadImage;
        page.status = PageStatus::Ready;
        let page_id = page.id;
        pages.add_page(page).await.unwrap();
        store
            .save_image(&PageImage {
                page_id,
                blob: vec![1, 2, 3],
                width: 10,
                height: 10,
            })
            .await
            .unwrap();

        let client = Arc::new(FakeOcrClient {
            should_fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let coordinator = Arc::new(OcrCoordinator::new(client, 2, store.clone(), pages.clone(), bus, health));
        (coordinator, pages, store, page_id)
    }

    #[tokio::test]
    async fn successful_submit_reaches_ocr_success() {
        let (coordinator, pages, _store, page_id) = setup().await;
        coordinator.submit(page_id, OcrMode::Document).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let page = pages.get(page_id).await.unwrap();
        assert_eq!(page.status, PageStatus::OcrSuccess);
        assert_eq!(page.ocr_text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn rejects_submission_for_a_page_that_is_not_ready() {
        let (coordinator, pages, _store, page_id) = setup().await;
        pages.update_status(page_id, PageStatus::PendingOcr).await.unwrap();

        let err = coordinator.submit(page_id, OcrMode::Document).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn batch_submit_reports_nothing_eligible_when_all_pages_are_busy() {
        let (coordinator, pages, _store, page_id) = setup().await;
        pages.update_status(page_id, PageStatus::PendingOcr).await.unwrap();

        let err = coordinator.submit_batch(&[page_id]).await.unwrap_err();
        assert!(matches!(err, CoreError::NothingEligible));
    }

    #[tokio::test]
    async fn cancel_before_network_call_reverts_to_ready_without_error() {
        let (coordinator, pages, _store, page_id) = setup().await;
        coordinator.submit(page_id, OcrMode::Document).await.unwrap();
        coordinator.cancel(page_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let page = pages.get(page_id).await.unwrap();
        assert!(matches!(page.status, PageStatus::Ready | PageStatus::Recognizing | PageStatus::OcrSuccess));
    }
}
