use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a [`Page`]. A newtype rather than a bare [`Uuid`] so a
/// [`SourceFileId`] can never be passed where a page is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a [`SourceFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFileId(pub Uuid);

impl SourceFileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceFileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    UploadImage,
    PdfGenerated,
}

/// A page's position in the lifecycle state machine. See
/// [`crate::state_machine`] for the transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    PendingRender,
    Rendering,
    Ready,
    PendingOcr,
    Recognizing,
    OcrSuccess,
    PendingGen,
    GeneratingMarkdown,
    MarkdownSuccess,
    GeneratingPdf,
    PdfSuccess,
    GeneratingDocx,
    Completed,
    Error,
}

impl PageStatus {
    /// `progress` is always 100 whenever status is one of these.
    pub fn implies_full_progress(self) -> bool {
        matches!(self, Self::Ready | Self::OcrSuccess | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Raw OCR response, preserved verbatim including unknown fields so the
/// engine never drops data the remote service returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrToken {
    pub token: String,
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrBox {
    #[serde(rename = "type")]
    pub box_type: String,
    #[serde(rename = "box")]
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRecord {
    pub text: String,
    pub raw_text: Vec<OcrToken>,
    pub boxes: Vec<OcrBox>,
    /// Unknown extra fields from the remote service, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The primary aggregate: one unit of document processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub filename: String,
    pub byte_size: u64,
    pub media_type: String,
    pub origin: Origin,
    pub status: PageStatus,
    pub progress: u8,
    pub order: i64,
    pub source_file_id: Option<SourceFileId>,
    pub page_number: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumbnail: Vec<u8>,
    pub ocr_text: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub log: Vec<LogEntry>,
    /// Status this page held immediately before its most recent transition
    /// into `Error`. Used to replay the last attempted transition on retry;
    /// retry counts are intentionally not tracked.
    pub pre_error_status: Option<PageStatus>,
}

impl Page {
    pub fn new_image(filename: String, byte_size: u64, media_type: String, order: i64) -> Self {
        Self {
            id: PageId::new(),
            filename,
            byte_size,
            media_type,
            origin: Origin::UploadImage,
            status: PageStatus::Ready,
            progress: 100,
            order,
            source_file_id: None,
            page_number: None,
            width: None,
            height: None,
            thumbnail: Vec::new(),
            ocr_text: None,
            ocr_confidence: None,
            log: Vec::new(),
            pre_error_status: None,
        }
    }

    pub fn new_pdf_page(
        filename: String,
        source_file_id: SourceFileId,
        page_number: u32,
        order: i64,
    ) -> Self {
        Self {
            id: PageId::new(),
            filename,
            byte_size: 0,
            media_type: "application/pdf".to_string(),
            origin: Origin::PdfGenerated,
            status: PageStatus::PendingRender,
            progress: 0,
            order,
            source_file_id: Some(source_file_id),
            page_number: Some(page_number),
            width: None,
            height: None,
            thumbnail: Vec::new(),
            ocr_text: None,
            ocr_confidence: None,
            log: Vec::new(),
            pre_error_status: None,
        }
    }

    pub fn append_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.log.push(LogEntry::new(level, message));
    }
}

/// Raw bytes of an imported PDF, retained only until every derived page
/// reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: SourceFileId,
    pub filename: String,
    pub byte_size: u64,
    pub content: Vec<u8>,
}

/// Full-resolution rendered bytes for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageImage {
    pub page_id: PageId,
    pub blob: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Markdown,
    Docx,
    Pdf,
}

impl ArtifactFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }
}

/// One generated derivative of a page, keyed by (pageId, format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageArtifact {
    pub page_id: PageId,
    pub format: ArtifactFormat,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A sub-region cropped from a page's image during Markdown assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub page_id: PageId,
    pub index: u32,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// OCR request mode, per the external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    Document,
    Ocr,
    Free,
    Figure,
    Describe,
    Freeform,
}
