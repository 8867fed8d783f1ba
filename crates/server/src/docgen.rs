//! Doc Generator: turns an OCR result into per-page Markdown/DOCX/
//! searchable-PDF artifacts, and concatenates per-page artifacts into a
//! whole-document export. Grounded on the `printpdf` page-building
//! idiom (fonts, XObjects, text-matrix ops) used for composing styled
//! pages elsewhere, and on `docx-rs` for the DOCX tree.

use std::sync::Arc;

use chrono::Utc;
use docx_rs::{read_docx, Docx, Paragraph, Pic, Run};
use image::GenericImageView;
use printpdf::ops::Op;
use printpdf::text::TextItem;
use printpdf::xobject::{XObject, XObjectTransform};
use printpdf::{FontId, Mm, PdfDocument, PdfPage, PdfSaveOptions, Pt, Rgb};

use scan2doc_core::config::EngineConfig;
use scan2doc_core::error::{CoreError, CoreResult};
use scan2doc_core::event_bus::{Event, EventBus};
use scan2doc_core::model::{ArtifactFormat, ExtractedImage, OcrRecord, Page, PageArtifact, PageId, PageStatus};
use scan2doc_core::page_store::PageStore;
use scan2doc_core::queue::BoundedQueue;
use scan2doc_core::store_api::ObjectStore;

/// Output of one format's generation: the artifact bytes plus any
/// regions cropped out of the page image (Markdown only).
pub struct GeneratedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub extracted_images: Vec<ExtractedImage>,
}

/// One format's generation logic. `extracted` carries whatever the
/// Markdown stage has already cropped out of the page image, so the
/// DOCX and PDF stages embed the same regions rather than re-cropping.
pub trait ArtifactGenerator: Send + Sync {
    fn format(&self) -> ArtifactFormat;
    fn generate(
        &self,
        page: &Page,
        ocr: &OcrRecord,
        image_bytes: &[u8],
        extracted: &[ExtractedImage],
    ) -> CoreResult<GeneratedArtifact>;
}

/// Assembles Markdown from the OCR text, cropping any box whose `type`
/// is not `"text"` into a standalone image and replacing it inline with
/// a stable `page:{id}:img:{index}` reference.
pub struct MarkdownGenerator;

impl ArtifactGenerator for MarkdownGenerator {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Markdown
    }

    fn generate(
        &self,
        page: &Page,
        ocr: &OcrRecord,
        image_bytes: &[u8],
        _extracted: &[ExtractedImage],
    ) -> CoreResult<GeneratedArtifact> {
        let mut markdown = ocr.text.clone();
        let mut extracted_images = Vec::new();

        let figures: Vec<_> = ocr.boxes.iter().filter(|b| b.box_type != "text").collect();
        if !figures.is_empty() {
            let source = image::load_from_memory(image_bytes)
                .map_err(|e| CoreError::Generation(format!("failed to decode page image: {e}")))?;
            let (img_w, img_h) = source.dimensions();

            markdown.push_str("\n\n");
            for (index, figure) in figures.into_iter().enumerate() {
                let [x0, y0, x1, y1] = figure.bbox;
                let x = (x0.max(0.0) as u32).min(img_w);
                let y = (y0.max(0.0) as u32).min(img_h);
                let w = ((x1 - x0).max(1.0) as u32).min(img_w.saturating_sub(x).max(1));
                let h = ((y1 - y0).max(1.0) as u32).min(img_h.saturating_sub(y).max(1));

                let cropped = source.crop_imm(x, y, w, h);
                let mut bytes = Vec::new();
                cropped
                    .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
                    .map_err(|e| CoreError::Generation(format!("failed to encode cropped region: {e}")))?;

                markdown.push_str(&format!("\n![figure](page:{}:img:{index})\n", page.id));
                extracted_images.push(ExtractedImage {
                    page_id: page.id,
                    index: index as u32,
                    bytes,
                    mime_type: "image/png".to_string(),
                });
            }
        }

        Ok(GeneratedArtifact {
            bytes: markdown.into_bytes(),
            mime_type: ArtifactFormat::Markdown.mime_type(),
            extracted_images,
        })
    }
}

/// Walks the Markdown artifact line by line, emitting a paragraph per
/// text line and a [`Pic`] wherever a `page:{id}:img:{index}` reference
/// appears, pulled from the already-extracted regions.
pub struct DocxGenerator;

impl ArtifactGenerator for DocxGenerator {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Docx
    }

    fn generate(
        &self,
        page: &Page,
        ocr: &OcrRecord,
        _image_bytes: &[u8],
        extracted: &[ExtractedImage],
    ) -> CoreResult<GeneratedArtifact> {
        let mut docx = build_docx_body(Docx::new(), page, &ocr.text, extracted)?;
        let mut bytes = Vec::new();
        docx.build()
            .pack(&mut bytes)
            .map_err(|e| CoreError::Generation(format!("failed to pack DOCX: {e}")))?;

        Ok(GeneratedArtifact {
            bytes,
            mime_type: ArtifactFormat::Docx.mime_type(),
            extracted_images: Vec::new(),
        })
    }
}

fn build_docx_body(mut docx: Docx, page: &Page, text: &str, extracted: &[ExtractedImage]) -> CoreResult<Docx> {
    let marker = format!("page:{}:img:", page.id);
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)));
        if let Some(index_str) = line.trim().strip_prefix(&marker) {
            // Markdown emits bare "![figure](page:{id}:img:{index})" lines;
            // `marker` only matches the id fragment, so also peel the rest.
            let digits: String = index_str.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(index) = digits.parse::<u32>() {
                if let Some(image) = extracted.iter().find(|e| e.index == index) {
                    docx = docx.add_paragraph(
                        Paragraph::new().add_run(Run::new().add_image(Pic::new(&image.bytes))),
                    );
                }
            }
        }
    }
    Ok(docx)
}

/// Composes the page image as a full-page background with a
/// transparent text layer positioned from the OCR's per-token
/// coordinates, so the page looks identical to the scan but its text
/// is selectable.
pub struct SearchablePdfGenerator {
    font_path: Option<String>,
}

impl SearchablePdfGenerator {
    pub fn new(font_path: Option<String>) -> Self {
        Self { font_path }
    }
}

impl ArtifactGenerator for SearchablePdfGenerator {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Pdf
    }

    fn generate(
        &self,
        page: &Page,
        ocr: &OcrRecord,
        image_bytes: &[u8],
        _extracted: &[ExtractedImage],
    ) -> CoreResult<GeneratedArtifact> {
        let mut doc = PdfDocument::new(&page.filename);
        let font = load_font(&mut doc, self.font_path.as_deref());
        render_searchable_page(&mut doc, font.as_ref(), page, ocr, image_bytes)?;

        let mut bytes = Vec::new();
        let mut warnings = Vec::new();
        doc.save_writer(&mut bytes, &PdfSaveOptions::default(), &mut warnings);

        Ok(GeneratedArtifact {
            bytes,
            mime_type: ArtifactFormat::Pdf.mime_type(),
            extracted_images: Vec::new(),
        })
    }
}

/// Loads the configured font, if any. Missing or unreadable fonts are
/// non-fatal: the generated PDF still carries the scanned image, just
/// without a selectable text layer.
fn load_font(doc: &mut PdfDocument, font_path: Option<&str>) -> Option<FontId> {
    let path = font_path?;
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path, %err, "could not read configured PDF font, text layer will be omitted");
            return None;
        }
    };
    let mut warnings = Vec::new();
    let font = printpdf::font::ParsedFont::from_bytes(&bytes, 0, &mut warnings)?;
    Some(doc.add_font(&font))
}

/// Builds one page of `doc`: the page image as a background XObject, at
/// a 1px-per-point scale (matching the 72 DPI convention used wherever
/// this crate places images on a PDF canvas), plus one invisible
/// [`Op::WriteText`] run per OCR token, positioned from its bounding box
/// with the origin flipped to PDF's bottom-left coordinate system. A
/// `None` font renders the page with no text layer.
fn render_searchable_page(
    doc: &mut PdfDocument,
    font: Option<&FontId>,
    page: &Page,
    ocr: &OcrRecord,
    image_bytes: &[u8],
) -> CoreResult<()> {
    let width = page.width.unwrap_or(612) as f32;
    let height = page.height.unwrap_or(792) as f32;

    let mut warnings = Vec::new();
    let raw_image = printpdf::image::RawImage::decode_from_bytes(image_bytes, &mut warnings)
        .map_err(|e| CoreError::Generation(format!("failed to decode page image: {e}")))?;
    let (img_w, img_h) = (raw_image.width as f32, raw_image.height as f32);
    let xobj_id = printpdf::XObjectId::new();
    doc.resources.xobjects.map.insert(xobj_id.clone(), XObject::Image(raw_image));

    let mut ops = vec![Op::UseXobject {
        id: xobj_id,
        transform: XObjectTransform {
            translate_x: Some(Pt(0.0)),
            translate_y: Some(Pt(0.0)),
            scale_x: Some(width / img_w),
            scale_y: Some(height / img_h),
            rotate: None,
            dpi: Some(72.0),
        },
    }];

    if let Some(font) = font {
        ops.push(Op::StartTextSection);
        // Transparent fill renders the OCR text layer invisibly over the
        // scanned image while keeping it selectable/searchable.
        ops.push(Op::SetFillColor {
            col: printpdf::color::Color::Rgb(Rgb::new(1.0, 1.0, 1.0, None)),
        });
        for token in &ocr.raw_text {
            let [x0, y0, _x1, y1] = token.bbox;
            let font_size = (y1 - y0).max(1.0);
            ops.push(Op::SetFontSize {
                size: Pt(font_size),
                font: font.clone(),
            });
            ops.push(Op::SetTextMatrix {
                matrix: printpdf::matrix::TextMatrix::Translate(Pt(x0 as f32), Pt(height - y1 as f32)),
            });
            ops.push(Op::WriteText {
                items: vec![TextItem::Text(token.token.clone())],
                font: font.clone(),
            });
        }
        ops.push(Op::EndTextSection);
    }

    doc.pages.push(PdfPage::new(Mm::from(Pt(width)), Mm::from(Pt(height)), ops));
    Ok(())
}

/// Concatenates already-generated per-page PDFs into one document by
/// re-parsing each and appending its pages, rather than re-rendering.
fn concatenate_pdfs(parts: Vec<Vec<u8>>) -> CoreResult<Vec<u8>> {
    let mut merged: Option<PdfDocument> = None;
    for part in parts {
        let mut warnings = Vec::new();
        let doc = PdfDocument::parse(&part, &printpdf::PdfParseOptions::default(), &mut warnings)
            .map_err(|e| CoreError::Generation(format!("failed to parse page PDF for export: {e}")))?;
        match &mut merged {
            None => merged = Some(doc),
            Some(m) => m.pages.extend(doc.pages),
        }
    }
    let doc = merged.ok_or_else(|| CoreError::Generation("no pages to export".into()))?;
    let mut bytes = Vec::new();
    let mut warnings = Vec::new();
    doc.save_writer(&mut bytes, &PdfSaveOptions::default(), &mut warnings);
    Ok(bytes)
}

/// Merges per-page DOCX bytes into one document with a page break
/// between pages, by re-reading each with `docx-rs` and splicing its
/// body children into a fresh document.
fn concatenate_docx(parts: Vec<Vec<u8>>) -> CoreResult<Vec<u8>> {
    let mut merged = Docx::new();
    for (i, part) in parts.into_iter().enumerate() {
        let parsed = read_docx(&part).map_err(|e| CoreError::Generation(format!("failed to parse page DOCX for export: {e}")))?;
        if i > 0 {
            merged = merged.add_paragraph(Paragraph::new().page_break_before(true));
        }
        merged.document.children.extend(parsed.document.children);
    }
    let mut bytes = Vec::new();
    merged
        .build()
        .pack(&mut bytes)
        .map_err(|e| CoreError::Generation(format!("failed to pack merged DOCX: {e}")))?;
    Ok(bytes)
}

/// Document-level export result: either the concatenated bytes, or a
/// count of pages that are not yet ready.
pub enum ExportOutcome {
    Ready { bytes: Vec<u8>, mime_type: &'static str, filename: String },
    SomeNotReady { not_ready: usize, total: usize },
}

pub struct DocGenCoordinator {
    generators: Vec<Arc<dyn ArtifactGenerator>>,
    queue: BoundedQueue,
    store: Arc<dyn ObjectStore>,
    pages: Arc<PageStore>,
    bus: Arc<EventBus>,
    config: EngineConfig,
}

impl DocGenCoordinator {
    pub fn new(
        concurrency: usize,
        store: Arc<dyn ObjectStore>,
        pages: Arc<PageStore>,
        bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let generators: Vec<Arc<dyn ArtifactGenerator>> = vec![
            Arc::new(MarkdownGenerator),
            Arc::new(SearchablePdfGenerator::new(config.pdf_font_path.clone())),
            Arc::new(DocxGenerator),
        ];
        Self {
            generators,
            queue: BoundedQueue::new(concurrency),
            store,
            pages,
            bus,
            config,
        }
    }

    /// Subscribes to `ocr:success` so every recognized page automatically
    /// walks the generation pipeline for the configured formats.
    pub fn spawn_auto_trigger(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(move |event| {
            if let Event::OcrSuccess { page_id, .. } = event {
                let this = this.clone();
                let page_id = *page_id;
                tokio::spawn(async move {
                    this.submit(page_id).await;
                });
            }
        });
    }

    pub async fn submit(self: &Arc<Self>, page_id: PageId) {
        let this = self.clone();
        let result = self
            .queue
            .add(page_id, move |cancel| async move {
                if cancel.is_cancelled() {
                    return;
                }
                this.run_pipeline(page_id).await;
            })
            .await;
        if let Err(err) = result {
            tracing::debug!(%page_id, %err, "generation task already in flight, skipping re-admission");
        }
    }

    fn stage_table(&self) -> [(PageStatus, PageStatus, &dyn ArtifactGenerator); 3] {
        [
            (PageStatus::GeneratingMarkdown, PageStatus::MarkdownSuccess, self.generators[0].as_ref()),
            (PageStatus::GeneratingPdf, PageStatus::PdfSuccess, self.generators[1].as_ref()),
            (PageStatus::GeneratingDocx, PageStatus::Completed, self.generators[2].as_ref()),
        ]
    }

    /// Walks `pending_gen -> generating_markdown -> markdown_success ->
    /// generating_pdf -> pdf_success -> generating_docx -> completed`
    /// unconditionally; a format not in the configured set is skipped
    /// (no artifact produced) but the page still advances through its
    /// status so later formats remain reachable.
    async fn run_pipeline(&self, page_id: PageId) {
        if let Err(err) = self.pages.update_status(page_id, PageStatus::PendingGen).await {
            tracing::debug!(%page_id, %err, "page not eligible for generation, skipping");
            return;
        }
        self.run_stages_from(page_id, 0).await;
    }

    /// Re-admission entry point for boot resume: the page has already
    /// been reverted to the pending predecessor of the `generating_*`
    /// status it crashed in, so this walks only the remaining stages
    /// rather than re-entering at `pending_gen`.
    pub async fn resume_readmit(self: &Arc<Self>, page_id: PageId) {
        let this = self.clone();
        let result = self
            .queue
            .add(page_id, move |cancel| async move {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(page) = this.pages.get(page_id).await else {
                    return;
                };
                let start = match page.status {
                    PageStatus::PendingGen => 0,
                    PageStatus::MarkdownSuccess => 1,
                    PageStatus::PdfSuccess => 2,
                    _ => {
                        tracing::warn!(%page_id, status = ?page.status, "resume_readmit called on a page outside the generation pipeline");
                        return;
                    }
                };
                this.run_stages_from(page_id, start).await;
            })
            .await;
        if let Err(err) = result {
            tracing::debug!(%page_id, %err, "generation task already in flight, skipping resume re-admission");
        }
    }

    async fn run_stages_from(&self, page_id: PageId, start: usize) {
        let stages = self.stage_table();
        let mut extracted = Vec::new();
        for (entering, leaving, generator) in &stages[start..] {
            if let Err(err) = self.run_stage(page_id, *entering, *leaving, *generator, &mut extracted).await {
                self.fail(page_id, *generator, err).await;
                return;
            }
        }
    }

    async fn run_stage(
        &self,
        page_id: PageId,
        entering: PageStatus,
        leaving: PageStatus,
        generator: &dyn ArtifactGenerator,
        extracted: &mut Vec<ExtractedImage>,
    ) -> CoreResult<()> {
        self.pages.update_status(page_id, entering).await?;
        self.bus.publish(Event::GenStart { page_id, format: generator.format() });

        if !self.config.generation_formats.contains(&generator.format()) {
            self.pages.update_status(page_id, leaving).await?;
            return Ok(());
        }

        let page = self
            .pages
            .get(page_id)
            .await
            .ok_or_else(|| CoreError::StoreCorrupt(format!("page {page_id} not found")))?;
        let ocr = self
            .store
            .get_ocr_record(page_id)
            .await?
            .ok_or_else(|| CoreError::StoreCorrupt(format!("no OCR record for page {page_id}")))?;
        let image = self
            .store
            .get_image(page_id)
            .await?
            .ok_or_else(|| CoreError::StoreCorrupt(format!("no rendered image for page {page_id}")))?;

        let generated = generator.generate(&page, &ocr, &image.blob, extracted)?;
        extracted.extend(generated.extracted_images.iter().cloned());
        for extracted_image in &generated.extracted_images {
            self.store.save_extracted_image(extracted_image).await?;
        }
        self.store
            .save_artifact(&PageArtifact {
                page_id,
                format: generator.format(),
                mime_type: generated.mime_type.to_string(),
                bytes: generated.bytes,
            })
            .await?;

        self.pages.update_status(page_id, leaving).await?;
        self.bus.publish(Event::GenSuccess { page_id, format: generator.format() });
        Ok(())
    }

    async fn fail(&self, page_id: PageId, generator: &dyn ArtifactGenerator, err: CoreError) {
        tracing::warn!(%page_id, format = ?generator.format(), %err, "generation failed");
        let _ = self
            .pages
            .append_log(page_id, scan2doc_core::model::LogLevel::Error, err.to_string())
            .await;
        let _ = self.pages.update_status(page_id, PageStatus::Error).await;
        self.bus.publish(Event::GenError {
            page_id,
            format: generator.format(),
            error: err.to_string(),
        });
    }

    /// Concatenates the per-page `format` artifacts for `page_ids`, in
    /// `order`. Every page must be at or past `ocr_success`; otherwise
    /// returns the not-ready count for the caller to confirm a skip.
    pub async fn export_document(&self, page_ids: &[PageId], format: ArtifactFormat) -> CoreResult<ExportOutcome> {
        let mut pages = Vec::with_capacity(page_ids.len());
        let mut not_ready = 0usize;
        for &id in page_ids {
            match self.pages.get(id).await {
                Some(page) if is_at_or_past_ocr_success(page.status) => pages.push(page),
                _ => not_ready += 1,
            }
        }

        if not_ready > 0 {
            return Ok(ExportOutcome::SomeNotReady {
                not_ready,
                total: page_ids.len(),
            });
        }

        pages.sort_by_key(|p| p.order);

        let mut artifacts = Vec::with_capacity(pages.len());
        for page in &pages {
            let artifact = self
                .store
                .get_artifact(page.id, format)
                .await?
                .ok_or_else(|| CoreError::StoreCorrupt(format!("missing {format:?} artifact for page {}", page.id)))?;
            artifacts.push(artifact.bytes);
        }

        let document_id = format!("document_{}", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        self.bus.publish(Event::ExportStart {
            document_id: document_id.clone(),
            format,
        });

        let bytes = match self.merge(format, artifacts) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.bus.publish(Event::ExportError {
                    document_id,
                    format,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        self.bus.publish(Event::ExportDone {
            document_id: document_id.clone(),
            format,
        });

        Ok(ExportOutcome::Ready {
            bytes,
            mime_type: format.mime_type(),
            filename: format!("{document_id}.{}", format.extension()),
        })
    }

    fn merge(&self, format: ArtifactFormat, artifacts: Vec<Vec<u8>>) -> CoreResult<Vec<u8>> {
        match format {
            ArtifactFormat::Markdown => {
                let parts: Vec<String> = artifacts
                    .into_iter()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .collect();
                Ok(parts.join("\n\n---\n\n").into_bytes())
            }
            ArtifactFormat::Docx => concatenate_docx(artifacts),
            ArtifactFormat::Pdf => concatenate_pdfs(artifacts),
        }
    }
}

fn is_at_or_past_ocr_success(status: PageStatus) -> bool {
    matches!(
        status,
        PageStatus::OcrSuccess
            | PageStatus::PendingGen
            | PageStatus::GeneratingMarkdown
            | PageStatus::MarkdownSuccess
            | PageStatus::GeneratingPdf
            | PageStatus::PdfSuccess
            | PageStatus::GeneratingDocx
            | PageStatus::Completed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan2doc_core::model::{Origin, PageImage, SourceFile, SourceFileId};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn sample_image_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn sample_ocr_record() -> OcrRecord {
        OcrRecord {
            text: "hello world".into(),
            raw_text: vec![],
            boxes: vec![],
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn markdown_generator_crops_non_text_boxes_into_extracted_images() {
        let page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        let mut ocr = sample_ocr_record();
        ocr.boxes.push(scan2doc_core::model::OcrBox {
            box_type: "figure".into(),
            bbox: [0.0, 0.0, 4.0, 4.0],
        });

        let generated = MarkdownGenerator.generate(&page, &ocr, &sample_image_bytes(), &[]).unwrap();
        let markdown = String::from_utf8(generated.bytes).unwrap();

        assert!(markdown.contains("hello world"));
        assert!(markdown.contains(&format!("page:{}:img:0", page.id)));
        assert_eq!(generated.extracted_images.len(), 1);
    }

    #[derive(Default)]
    struct FakeStore {
        pages: StdMutex<HashMap<PageId, Page>>,
        images: StdMutex<HashMap<PageId, PageImage>>,
        ocr: StdMutex<HashMap<PageId, OcrRecord>>,
        artifacts: StdMutex<HashMap<(PageId, ArtifactFormat), PageArtifact>>,
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
        async fn save_artifact(&self, artifact: &PageArtifact) -> CoreResult<()> {
            self.artifacts
                .lock()
                .unwrap()
                .insert((artifact.page_id, artifact.format), artifact.clone());
            Ok(())
        }
        async fn get_artifact(&self, page_id: PageId, format: ArtifactFormat) -> CoreResult<Option<PageArtifact>> {
            Ok(self.artifacts.lock().unwrap().get(&(page_id, format)).cloned())
        }
        async fn save_extracted_image(&self, _image: &ExtractedImage) -> CoreResult<()> {
            Ok(())
        }
        async fn get_extracted_images(&self, _page_id: PageId) -> CoreResult<Vec<ExtractedImage>> {
            Ok(vec![])
        }
        async fn save_ocr_record(&self, page_id: PageId, record: &OcrRecord) -> CoreResult<()> {
            self.ocr.lock().unwrap().insert(page_id, record.clone());
            Ok(())
        }
        async fn get_ocr_record(&self, page_id: PageId) -> CoreResult<Option<OcrRecord>> {
            Ok(self.ocr.lock().unwrap().get(&page_id).cloned())
        }
        async fn clear_all_data(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    async fn setup() -> (Arc<DocGenCoordinator>, Arc<PageStore>, PageId) {
        let store = Arc::new(FakeStore::default());
        let bus = Arc::new(EventBus::new());
        let pages = Arc::new(PageStore::new(store.clone(), bus.clone()));

        let mut page = Page::new_image("a.png".into(), 10, "image/png".into(), 0);
        page.origin = Origin::UploadImage;
        page.status = PageStatus::OcrSuccess;
        let page_id = page.id;
        pages.add_page(page).await.unwrap();

        store
            .save_image(&PageImage {
                page_id,
                blob: sample_image_bytes(),
                width: 8,
                height: 8,
            })
            .await
            .unwrap();
        store.save_ocr_record(page_id, &sample_ocr_record()).await.unwrap();

        let config = EngineConfig::default();
        let coordinator = Arc::new(DocGenCoordinator::new(1, store, pages.clone(), bus, config));
        (coordinator, pages, page_id)
    }

    #[tokio::test]
    async fn submit_walks_the_full_pipeline_to_completed() {
        let (coordinator, pages, page_id) = setup().await;
        coordinator.submit(page_id).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let page = pages.get(page_id).await.unwrap();
        assert_eq!(page.status, PageStatus::Completed);
    }

    #[tokio::test]
    async fn export_document_reports_not_ready_pages_without_failing() {
        let (coordinator, pages, _page_id) = setup().await;

        let mut pending = Page::new_image("b.png".into(), 10, "image/png".into(), 1);
        pending.status = PageStatus::Ready;
        let pending_id = pending.id;
        pages.add_page(pending).await.unwrap();

        let outcome = coordinator
            .export_document(&[pending_id], ArtifactFormat::Markdown)
            .await
            .unwrap();
        assert!(matches!(outcome, ExportOutcome::SomeNotReady { not_ready: 1, total: 1 }));
    }

    #[tokio::test]
    async fn export_document_merges_ready_pages_into_one_markdown_file() {
        let (coordinator, pages, page_id) = setup().await;
        coordinator.submit(page_id).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pages.get(page_id).await.unwrap().status, PageStatus::Completed);

        let outcome = coordinator
            .export_document(&[page_id], ArtifactFormat::Markdown)
            .await
            .unwrap();
        match outcome {
            ExportOutcome::Ready { bytes, mime_type, .. } => {
                assert_eq!(mime_type, "text/markdown");
                assert!(String::from_utf8(bytes).unwrap().contains("hello world"));
            }
            ExportOutcome::SomeNotReady { .. } => panic!("expected a ready export"),
        }
    }
}
