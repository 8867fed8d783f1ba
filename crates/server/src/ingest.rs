//! Ingestor: turns uploaded files into page rows. Grounded on the
//! multipart upload handling shape used for PDF intake, generalized
//! from "one PDF -> one job" to "N files -> N pages with per-file
//! fan-out", and on the `image`/`pdfium-render` calls used for
//! dimension and page-count extraction.

use std::sync::Arc;

use image::GenericImageView;
use pdfium_render::prelude::Pdfium;

use scan2doc_core::error::{CoreError, CoreResult};
use scan2doc_core::event_bus::EventBus;
use scan2doc_core::model::{Page, PageImage, SourceFile, SourceFileId};
use scan2doc_core::page_store::PageStore;
use scan2doc_core::store_api::ObjectStore;
use scan2doc_core::EngineConfig;

use crate::render::{make_thumbnail, RenderCoordinator};

/// One uploaded file, before validation.
pub struct IncomingFile {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Per-call overrides of the engine-wide size caps.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestOpts {
    pub max_image_bytes: Option<u64>,
    pub max_pdf_bytes: Option<u64>,
}

pub struct IngestResult {
    pub success: bool,
    pub pages: Vec<Page>,
    pub error: Option<String>,
}

pub struct Ingestor {
    store: Arc<dyn ObjectStore>,
    pages: Arc<PageStore>,
    render: Arc<RenderCoordinator>,
    bus: Arc<EventBus>,
    config: EngineConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pages: Arc<PageStore>,
        render: Arc<RenderCoordinator>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            pages,
            render,
            bus,
            config,
        }
    }

    /// Files keep their argument order; within a PDF, pages are emitted
    /// 1..N. A single call reserves one contiguous `order` block per PDF
    /// atomically, so concurrent `ingest_files` calls never interleave
    /// a caller's own pages.
    pub async fn ingest_files(&self, files: Vec<IncomingFile>, opts: IngestOpts) -> IngestResult {
        let max_image_bytes = opts.max_image_bytes.unwrap_or(self.config.max_image_bytes);
        let max_pdf_bytes = opts.max_pdf_bytes.unwrap_or(self.config.max_pdf_bytes);

        let mut pages = Vec::new();
        let mut first_error = None;

        for file in files {
            let is_pdf = file.media_type == "application/pdf";
            let result = if is_pdf {
                self.ingest_pdf(file, max_pdf_bytes).await
            } else {
                self.ingest_image(file, max_image_bytes).await
            };

            match result {
                Ok(mut new_pages) => pages.append(&mut new_pages),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err.to_string());
                    }
                }
            }
        }

        IngestResult {
            success: first_error.is_none(),
            pages,
            error: first_error,
        }
    }

    async fn ingest_image(&self, file: IncomingFile, max_bytes: u64) -> CoreResult<Vec<Page>> {
        if file.bytes.len() as u64 > max_bytes {
            return Err(CoreError::Validation(format!(
                "{} exceeds the {max_bytes}-byte image limit",
                file.filename
            )));
        }

        let order = self.store.get_next_order().await?;
        let mut page = Page::new_image(file.filename, file.bytes.len() as u64, file.media_type, order);
        let page_id = page.id;

        // Image-origin pages never visit the render pool: dimensions and
        // thumbnail are measured inline and the page goes straight to
        // `ready`, per the ingestor's "skip directly to ready" contract.
        let (width, height) = image::load_from_memory(&file.bytes)
            .map(|img| img.dimensions())
            .unwrap_or((0, 0));
        page.width = Some(width);
        page.height = Some(height);
        page.thumbnail = make_thumbnail(&file.bytes, self.config.thumbnail_max_edge).unwrap_or_default();

        self.store
            .save_image(&PageImage {
                page_id,
                blob: file.bytes,
                width,
                height,
            })
            .await?;

        self.pages.add_page(page.clone()).await?;
        Ok(vec![page])
    }

    async fn ingest_pdf(&self, file: IncomingFile, max_bytes: u64) -> CoreResult<Vec<Page>> {
        if file.bytes.len() as u64 > max_bytes {
            return Err(CoreError::Validation(format!(
                "{} exceeds the {max_bytes}-byte PDF limit",
                file.filename
            )));
        }

        let page_count = count_pdf_pages(&file.bytes)?;
        if page_count == 0 {
            return Err(CoreError::Validation(format!("{} has no pages", file.filename)));
        }

        let source_file_id = SourceFileId::new();
        self.store
            .save_file(&SourceFile {
                id: source_file_id,
                filename: file.filename.clone(),
                byte_size: file.bytes.len() as u64,
                content: file.bytes,
            })
            .await?;

        let first_order = self.store.reserve_order_range(page_count as i64).await?;

        let mut pages = Vec::with_capacity(page_count as usize);
        for i in 0..page_count {
            // `page_number` is 1-based per the page data model; pdfium's
            // own page index is 0-based and is derived from this at
            // render time (see `render_one`).
            let page = Page::new_pdf_page(file.filename.clone(), source_file_id, i + 1, first_order + i as i64);
            self.pages.add_page(page.clone()).await?;
            self.render.submit(page.id).await;
            pages.push(page);
        }

        Ok(pages)
    }
}

fn count_pdf_pages(bytes: &[u8]) -> CoreResult<u32> {
    let bindings = Pdfium::bind_to_system_library()
        .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(".")))
        .map_err(|e| CoreError::Validation(format!("pdfium unavailable: {e}")))?;
    let pdfium = Pdfium::new(bindings);
    let doc = pdfium
        .load_pdf_from_byte_vec(bytes.to_vec(), None)
        .map_err(|e| CoreError::Validation(format!("failed to open PDF: {e}")))?;
    Ok(doc.pages().len() as u32)
}
