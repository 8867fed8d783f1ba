use serde::{Deserialize, Serialize};

use crate::model::ArtifactFormat;

/// Engine-wide tunables: queue concurrency, admission limits, health
/// polling cadence, and ingest size caps. A serde struct with
/// per-field defaults and a hand-written `Default` impl, so a partial
/// config file only needs to name the fields it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent render workers.
    #[serde(default = "default_render_concurrency")]
    pub render_concurrency: usize,

    /// Concurrent OCR submissions in flight.
    #[serde(default = "default_ocr_concurrency")]
    pub ocr_concurrency: usize,

    /// Concurrent generation tasks.
    #[serde(default = "default_gen_concurrency")]
    pub gen_concurrency: usize,

    /// Health Monitor poll interval in milliseconds.
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_interval_ms: u64,

    /// Health Monitor per-poll timeout in milliseconds.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Maximum accepted image size in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Maximum accepted PDF size in bytes.
    #[serde(default = "default_max_pdf_bytes")]
    pub max_pdf_bytes: u64,

    /// Longest edge, in pixels, of a generated thumbnail.
    #[serde(default = "default_thumbnail_max_edge")]
    pub thumbnail_max_edge: u32,

    /// Base URL of the remote OCR service.
    #[serde(default = "default_ocr_base_url")]
    pub ocr_base_url: String,

    /// Base URL of the remote OCR service's health endpoint, if different
    /// from `ocr_base_url`.
    #[serde(default)]
    pub health_base_url: Option<String>,

    /// Formats generated automatically on `ocr:success`.
    #[serde(default = "default_generation_formats")]
    pub generation_formats: Vec<ArtifactFormat>,

    /// Number of dedicated render worker threads.
    #[serde(default = "default_render_workers")]
    pub render_workers: usize,

    /// Path to a TrueType font file used for the searchable-PDF text
    /// layer. When unset or unreadable, generated PDFs fall back to the
    /// scanned image with no embedded text layer.
    #[serde(default)]
    pub pdf_font_path: Option<String>,
}

fn default_render_concurrency() -> usize {
    2
}

fn default_ocr_concurrency() -> usize {
    2
}

fn default_gen_concurrency() -> usize {
    1
}

fn default_health_poll_ms() -> u64 {
    5_000
}

fn default_health_timeout_ms() -> u64 {
    2_000
}

fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_pdf_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_thumbnail_max_edge() -> u32 {
    256
}

fn default_ocr_base_url() -> String {
    "http://localhost:8088".to_string()
}

fn default_generation_formats() -> Vec<ArtifactFormat> {
    vec![ArtifactFormat::Markdown, ArtifactFormat::Docx, ArtifactFormat::Pdf]
}

fn default_render_workers() -> usize {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_concurrency: default_render_concurrency(),
            ocr_concurrency: default_ocr_concurrency(),
            gen_concurrency: default_gen_concurrency(),
            health_poll_interval_ms: default_health_poll_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            max_image_bytes: default_max_image_bytes(),
            max_pdf_bytes: default_max_pdf_bytes(),
            thumbnail_max_edge: default_thumbnail_max_edge(),
            ocr_base_url: default_ocr_base_url(),
            health_base_url: None,
            generation_formats: default_generation_formats(),
            render_workers: default_render_workers(),
            pdf_font_path: None,
        }
    }
}
