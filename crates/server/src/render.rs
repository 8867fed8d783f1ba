//! Render Worker Pool: a fixed pool of dedicated OS threads, each
//! owning its own `Pdfium` binding and a per-`SourceFileId` document
//! cache, rendering PDF pages and re-encoding standalone images off the
//! coordinating task. Grounded on the page-rendering helpers built
//! around `pdfium-render` and `image`, generalized from one-shot
//! rendering into a long-lived pool with an explicit document cache and
//! cleanup hook.
//!
//! A dedicated thread per worker (rather than `spawn_blocking`) is what
//! lets the document cache be `&mut` and lock-free: each worker only
//! ever touches its own cache, and work is routed to the worker that
//! already holds the relevant document.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::GenericImageView;
use pdfium_render::prelude::{Pdfium, PdfDocument, PdfRenderConfig};
use tokio::sync::oneshot;

use scan2doc_core::error::{CoreError, CoreResult};
use scan2doc_core::event_bus::{Event, EventBus};
use scan2doc_core::model::{LogLevel, Page, PageImage, PageStatus, SourceFile, PageId, SourceFileId};
use scan2doc_core::page_store::PageStore;
use scan2doc_core::queue::BoundedQueue;
use scan2doc_core::store_api::ObjectStore;

/// One unit of render work. `pdf_bytes` is only consulted the first time
/// a given `source_file_id` is seen by its routed worker; subsequent
/// pages of the same file hit the cached document.
pub struct RenderRequest {
    pub page_id: PageId,
    pub source_file_id: Option<SourceFileId>,
    pub page_number: Option<u32>,
    pub image_bytes: Option<Vec<u8>>,
    pub pdf_bytes: Option<Arc<Vec<u8>>>,
    pub scale: f32,
}

pub struct RenderResponse {
    pub image_blob: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

enum WorkItem {
    Render(RenderRequest, oneshot::Sender<CoreResult<RenderResponse>>),
    DestroyDocument(SourceFileId),
}

/// Pool of render workers. Routes by `source_file_id` so every page of a
/// PDF lands on the worker already holding its cached document; images
/// (no `source_file_id`) are spread round-robin.
pub struct RenderWorkerPool {
    senders: Vec<std::sync::mpsc::Sender<WorkItem>>,
    round_robin: AtomicUsize,
}

impl RenderWorkerPool {
    pub fn spawn(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (tx, rx) = std::sync::mpsc::channel::<WorkItem>();
            std::thread::Builder::new()
                .name(format!("render-worker-{id}"))
                .spawn(move || worker_loop(id, rx))
                .expect("failed to spawn render worker thread");
            senders.push(tx);
        }
        Self {
            senders,
            round_robin: AtomicUsize::new(0),
        }
    }

    fn route(&self, source_file_id: Option<SourceFileId>) -> usize {
        match source_file_id {
            Some(id) => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                id.0.hash(&mut hasher);
                (hasher.finish() as usize) % self.senders.len()
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.senders.len(),
        }
    }

    pub async fn render(&self, req: RenderRequest) -> CoreResult<RenderResponse> {
        let idx = self.route(req.source_file_id);
        let (tx, rx) = oneshot::channel();
        self.senders[idx]
            .send(WorkItem::Render(req, tx))
            .map_err(|_| CoreError::Render("render worker thread is gone".into()))?;
        rx.await
            .map_err(|_| CoreError::Render("render worker dropped the response channel".into()))?
    }

    /// Evict the cached document for `source_file_id` from whichever
    /// worker holds it. Safe to call even if nothing is cached.
    pub fn destroy_document(&self, source_file_id: SourceFileId) {
        let idx = self.route(Some(source_file_id));
        let _ = self.senders[idx].send(WorkItem::DestroyDocument(source_file_id));
    }
}

fn worker_loop(id: usize, rx: std::sync::mpsc::Receiver<WorkItem>) {
    let pdfium = match Pdfium::bind_to_system_library().or_else(|_| {
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("."))
    }) {
        Ok(bindings) => Box::leak(Box::new(Pdfium::new(bindings))),
        Err(e) => {
            tracing::error!(worker = id, error = %e, "failed to load pdfium library");
            while let Ok(item) = rx.recv() {
                if let WorkItem::Render(_, reply) = item {
                    let _ = reply.send(Err(CoreError::Render(format!(
                        "pdfium unavailable on worker {id}: {e}"
                    ))));
                }
            }
            return;
        }
    };

    let mut cache: HashMap<SourceFileId, PdfDocument<'static>> = HashMap::new();

    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Render(req, reply) => {
                let result = render_one(pdfium, &mut cache, req);
                let _ = reply.send(result);
            }
            WorkItem::DestroyDocument(source_file_id) => {
                cache.remove(&source_file_id);
            }
        }
    }
}

fn render_one(
    pdfium: &'static Pdfium,
    cache: &mut HashMap<SourceFileId, PdfDocument<'static>>,
    req: RenderRequest,
) -> CoreResult<RenderResponse> {
    if let Some(bytes) = req.image_bytes {
        let img = image::load_from_memory(&bytes)
            .map_err(|e| CoreError::Render(format!("failed to decode image: {e}")))?;
        let (width, height) = img.dimensions();
        let mut image_blob = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut image_blob), image::ImageFormat::Png)
            .map_err(|e| CoreError::Render(format!("failed to encode PNG: {e}")))?;
        return Ok(RenderResponse { image_blob, width, height });
    }

    let source_file_id = req
        .source_file_id
        .ok_or_else(|| CoreError::Render("render request is missing a source file id".into()))?;
    let page_number = req
        .page_number
        .ok_or_else(|| CoreError::Render("render request is missing a page number".into()))?;

    if !cache.contains_key(&source_file_id) {
        let pdf_bytes = req.pdf_bytes.ok_or_else(|| {
            CoreError::Render("render request is missing PDF bytes for an uncached document".into())
        })?;
        let doc = pdfium
            .load_pdf_from_byte_vec((*pdf_bytes).clone(), None)
            .map_err(|e| CoreError::Render(format!("failed to open PDF: {e}")))?;
        cache.insert(source_file_id, doc);
    }

    let doc = cache.get(&source_file_id).expect("document was just cached");
    let page_index = page_number.checked_sub(1).ok_or_else(|| {
        CoreError::Render(format!("page number {page_number} is not a valid 1-based index"))
    })?;
    let page = doc
        .pages()
        .get(page_index as u16)
        .map_err(|e| CoreError::Render(format!("failed to get page {page_number}: {e}")))?;

    let scale = if req.scale > 0.0 { req.scale } else { 1.0 };
    let target_width = (page.width().value * scale) as i32;
    let target_height = (page.height().value * scale) as i32;
    let config = PdfRenderConfig::new()
        .set_target_width(target_width)
        .set_target_height(target_height);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| CoreError::Render(format!("failed to render page: {e}")))?;
    let img = bitmap.as_image();
    let (width, height) = img.dimensions();
    let mut image_blob = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut image_blob), image::ImageFormat::Png)
        .map_err(|e| CoreError::Render(format!("failed to encode PNG: {e}")))?;

    Ok(RenderResponse { image_blob, width, height })
}

/// Downscale `img` so its longest edge is at most `max_edge`, never
/// upscaling. Failure to produce a thumbnail is non-fatal to the caller.
pub fn make_thumbnail(bytes: &[u8], max_edge: u32) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    let resized = if longest > max_edge {
        let scale = max_edge as f32 / longest as f32;
        let new_w = ((w as f32) * scale).round().max(1.0) as u32;
        let new_h = ((h as f32) * scale).round().max(1.0) as u32;
        img.resize(new_w, new_h, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    let mut out = Vec::new();
    resized
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .ok()?;
    Some(out)
}

/// Bounded-queue front end for the render pool: admits at most
/// `render_concurrency` pages at a time, drives each through
/// `pending_render`/`rendering` -> `ready`|`error`, and destroys a
/// source file's cached document once its last page leaves rendering.
pub struct RenderCoordinator {
    pool: Arc<RenderWorkerPool>,
    queue: BoundedQueue,
    store: Arc<dyn ObjectStore>,
    pages: Arc<PageStore>,
    bus: Arc<EventBus>,
    thumbnail_max_edge: u32,
}

impl RenderCoordinator {
    pub fn new(
        pool: Arc<RenderWorkerPool>,
        concurrency: usize,
        store: Arc<dyn ObjectStore>,
        pages: Arc<PageStore>,
        bus: Arc<EventBus>,
        thumbnail_max_edge: u32,
    ) -> Self {
        Self {
            pool,
            queue: BoundedQueue::new(concurrency),
            store,
            pages,
            bus,
            thumbnail_max_edge,
        }
    }

    /// Admit a render task for `page_id`. A no-op (admission error
    /// swallowed) if the page already has a render task in flight, which
    /// happens naturally on resume re-admission races.
    pub async fn submit(self: &Arc<Self>, page_id: PageId) {
        let this = self.clone();
        let result = self
            .queue
            .add(page_id, move |cancel| async move {
                if cancel.is_cancelled() {
                    return;
                }
                this.run(page_id, cancel).await;
            })
            .await;
        if let Err(err) = result {
            tracing::debug!(%page_id, %err, "render task already in flight, skipping re-admission");
        }
    }

    pub async fn cancel(&self, page_id: PageId) {
        self.queue.cancel(page_id).await;
    }

    async fn run(&self, page_id: PageId, cancel: tokio_util::sync::CancellationToken) {
        let Some(page) = self.pages.get(page_id).await else {
            tracing::warn!(%page_id, "render task started for a page that no longer exists");
            return;
        };

        if let Err(err) = self.pages.update_status(page_id, PageStatus::Rendering).await {
            tracing::error!(%page_id, %err, "failed to transition page to rendering");
            return;
        }
        self.bus.publish(Event::RenderStart { page_id });

        let request = match self.build_request(&page).await {
            Ok(req) => req,
            Err(err) => {
                self.fail(page_id, err).await;
                return;
            }
        };

        let rendered = tokio::select! {
            result = self.pool.render(request) => result,
            _ = cancel.cancelled() => {
                tracing::debug!(%page_id, "render cancelled before worker replied");
                return;
            }
        };

        let response = match rendered {
            Ok(r) => r,
            Err(err) => {
                self.fail(page_id, err).await;
                return;
            }
        };

        let thumbnail = make_thumbnail(&response.image_blob, self.thumbnail_max_edge).unwrap_or_default();

        if let Err(err) = self
            .store
            .save_image(&PageImage {
                page_id,
                blob: response.image_blob.clone(),
                width: response.width,
                height: response.height,
            })
            .await
        {
            self.fail(page_id, err.into()).await;
            return;
        }

        let mut updated = page;
        updated.width = Some(response.width);
        updated.height = Some(response.height);
        updated.thumbnail = thumbnail;
        if let Err(err) = self.store.save_page(&updated).await {
            self.fail(page_id, err.into()).await;
            return;
        }

        if let Err(err) = self.pages.update_status(page_id, PageStatus::Ready).await {
            tracing::error!(%page_id, %err, "failed to transition rendered page to ready");
            return;
        }
        self.bus.publish(Event::RenderDone {
            page_id,
            width: response.width,
            height: response.height,
            thumbnail_bytes: updated.thumbnail.len(),
        });

        if let Some(source_file_id) = updated.source_file_id {
            self.maybe_cleanup_source_file(source_file_id).await;
        }
    }

    async fn build_request(&self, page: &Page) -> CoreResult<RenderRequest> {
        match page.source_file_id {
            Some(source_file_id) => {
                let file: SourceFile = self
                    .store
                    .get_file(source_file_id)
                    .await?
                    .ok_or_else(|| CoreError::StoreCorrupt(format!("source file {source_file_id} missing")))?;
                Ok(RenderRequest {
                    page_id: page.id,
                    source_file_id: Some(source_file_id),
                    page_number: page.page_number,
                    image_bytes: None,
                    pdf_bytes: Some(Arc::new(file.content)),
                    scale: 2.0,
                })
            }
            None => {
                let image = self
                    .store
                    .get_image(page.id)
                    .await?
                    .ok_or_else(|| CoreError::StoreCorrupt(format!("no uploaded bytes for page {}", page.id)))?;
                Ok(RenderRequest {
                    page_id: page.id,
                    source_file_id: None,
                    page_number: None,
                    image_bytes: Some(image.blob),
                    pdf_bytes: None,
                    scale: 1.0,
                })
            }
        }
    }

    async fn fail(&self, page_id: PageId, err: CoreError) {
        tracing::warn!(%page_id, %err, "render failed");
        let _ = self.pages.append_log(page_id, LogLevel::Error, err.to_string()).await;
        let _ = self.pages.update_status(page_id, PageStatus::Error).await;
        self.bus.publish(Event::RenderError {
            page_id,
            error: err.to_string(),
        });
    }

    /// Destroys the cached document once no page of `source_file_id`
    /// remains in `pending_render`/`rendering`, and deletes the source
    /// file row since nothing will read it again.
    async fn maybe_cleanup_source_file(&self, source_file_id: SourceFileId) {
        let still_rendering = self
            .pages
            .pages()
            .await
            .into_iter()
            .any(|p| {
                p.source_file_id == Some(source_file_id)
                    && matches!(p.status, PageStatus::PendingRender | PageStatus::Rendering)
            });
        if still_rendering {
            return;
        }
        self.pool.destroy_document(source_file_id);
        if let Err(err) = self.store.delete_file(source_file_id).await {
            tracing::warn!(%source_file_id, %err, "failed to delete source file after rendering completed");
        }
    }
}
