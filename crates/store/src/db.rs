//! Object Store: a transactional embedded store over `rusqlite` —
//! a single `Connection` behind a blocking `Mutex`, opened in WAL mode,
//! with indexed native columns next to a JSON blob for the full row.
//!
//! All operations acquire the same connection lock, so "atomic
//! read-modify-write" and "single transaction" requirements fall out of
//! lock scope rather than needing SQLite-level transactions for the
//! simple cases; multi-row operations (`delete_page`, `update_pages_order`)
//! still use an explicit `Connection::transaction()` so a partial failure
//! never leaves the cascade half-applied.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use scan2doc_core::error::CoreResult;
use scan2doc_core::model::{
    ArtifactFormat, ExtractedImage, OcrRecord, Page, PageArtifact, PageId, PageImage, PageStatus,
    SourceFile, SourceFileId,
};
use scan2doc_core::store_api::ObjectStore;

use crate::error::StoreError;

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if absent) the object store at `path`, in WAL mode,
    /// and apply forward-only migrations up to [`SCHEMA_VERSION`].
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::from)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS counters (
                name  TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO counters (name, value) VALUES ('order', 0);
            CREATE TABLE IF NOT EXISTS pages (
                id       TEXT PRIMARY KEY,
                order_val INTEGER NOT NULL,
                status   TEXT NOT NULL,
                data     TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pages_order ON pages(order_val);
            CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status);
            CREATE TABLE IF NOT EXISTS files (
                id        TEXT PRIMARY KEY,
                filename  TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                content   BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS page_images (
                page_id TEXT PRIMARY KEY,
                width   INTEGER NOT NULL,
                height  INTEGER NOT NULL,
                blob    BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS page_artifacts (
                page_id   TEXT NOT NULL,
                format    TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                bytes     BLOB NOT NULL,
                PRIMARY KEY (page_id, format)
            );
            CREATE TABLE IF NOT EXISTS page_extracted_images (
                page_id   TEXT NOT NULL,
                idx       INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                bytes     BLOB NOT NULL,
                PRIMARY KEY (page_id, idx)
            );
            CREATE TABLE IF NOT EXISTS page_ocr (
                page_id TEXT PRIMARY KEY,
                data    TEXT NOT NULL
            );",
        )
        .map_err(StoreError::from)?;

        let current_version: Option<i64> = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::from)?
            .and_then(|v| v.parse().ok());

        match current_version {
            None => {
                conn.execute(
                    "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(StoreError::from)?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                // Forward-only migrations would run here, keyed by `v`.
                conn.execute(
                    "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
                    params![SCHEMA_VERSION.to_string()],
                )
                .map_err(StoreError::from)?;
            }
            _ => {}
        }

        Ok(())
    }

    fn status_str(status: PageStatus) -> String {
        serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".to_string())
    }
}

fn row_to_page(row: &rusqlite::Row) -> rusqlite::Result<Page> {
    let data: String = row.get("data")?;
    serde_json::from_str(&data).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get_next_order(&self) -> CoreResult<i64> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let value: i64 = conn
            .query_row(
                "UPDATE counters SET value = value + 1 WHERE name = 'order' RETURNING value - 1",
                [],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(value)
    }

    async fn reserve_order_range(&self, count: i64) -> CoreResult<i64> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let first: i64 = conn
            .query_row(
                "UPDATE counters SET value = value + ?1 WHERE name = 'order' RETURNING value - ?1",
                params![count],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(first)
    }

    async fn save_page(&self, page: &Page) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let data = serde_json::to_string(page).map_err(StoreError::from)?;
        conn.execute(
            "INSERT INTO pages (id, order_val, status, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET order_val = excluded.order_val, status = excluded.status, data = excluded.data",
            params![
                page.id.0.to_string(),
                page.order,
                SqliteStore::status_str(page.status),
                data,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_page(&self, id: PageId) -> CoreResult<Option<Page>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let page = conn
            .query_row(
                "SELECT data FROM pages WHERE id = ?1",
                params![id.0.to_string()],
                row_to_page,
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(page)
    }

    async fn get_all_pages_for_display(&self) -> CoreResult<Vec<Page>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT data FROM pages ORDER BY order_val ASC")
            .map_err(StoreError::from)?;
        let pages = stmt
            .query_map([], row_to_page)
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(pages)
    }

    async fn get_pages_by_status(&self, status: PageStatus) -> CoreResult<Vec<Page>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT data FROM pages WHERE status = ?1 ORDER BY order_val ASC")
            .map_err(StoreError::from)?;
        let pages = stmt
            .query_map(params![SqliteStore::status_str(status)], row_to_page)
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(pages)
    }

    async fn delete_page(&self, id: PageId) -> CoreResult<()> {
        let mut conn = self.conn.lock().expect("object store lock poisoned");
        let tx = conn.transaction().map_err(StoreError::from)?;
        let id_str = id.0.to_string();
        tx.execute("DELETE FROM pages WHERE id = ?1", params![id_str])
            .map_err(StoreError::from)?;
        tx.execute("DELETE FROM page_images WHERE page_id = ?1", params![id_str])
            .map_err(StoreError::from)?;
        tx.execute("DELETE FROM page_artifacts WHERE page_id = ?1", params![id_str])
            .map_err(StoreError::from)?;
        tx.execute(
            "DELETE FROM page_extracted_images WHERE page_id = ?1",
            params![id_str],
        )
        .map_err(StoreError::from)?;
        tx.execute("DELETE FROM page_ocr WHERE page_id = ?1", params![id_str])
            .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_pages_order(&self, updates: &[(PageId, i64)]) -> CoreResult<()> {
        let mut conn = self.conn.lock().expect("object store lock poisoned");
        let tx = conn.transaction().map_err(StoreError::from)?;
        for (id, order) in updates {
            tx.execute(
                "UPDATE pages SET order_val = ?1, data = json_set(data, '$.order', ?1) WHERE id = ?2",
                params![order, id.0.to_string()],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn save_file(&self, file: &SourceFile) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        conn.execute(
            "INSERT INTO files (id, filename, byte_size, content) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET filename = excluded.filename, byte_size = excluded.byte_size, content = excluded.content",
            params![file.id.0.to_string(), file.filename, file.byte_size, file.content],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_file(&self, id: SourceFileId) -> CoreResult<Option<SourceFile>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let file = conn
            .query_row(
                "SELECT id, filename, byte_size, content FROM files WHERE id = ?1",
                params![id.0.to_string()],
                |row| {
                    let id_str: String = row.get(0)?;
                    Ok(SourceFile {
                        id: SourceFileId(id_str.parse().unwrap_or_default()),
                        filename: row.get(1)?,
                        byte_size: row.get(2)?,
                        content: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(file)
    }

    async fn delete_file(&self, id: SourceFileId) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        conn.execute("DELETE FROM files WHERE id = ?1", params![id.0.to_string()])
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn save_image(&self, image: &PageImage) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        conn.execute(
            "INSERT INTO page_images (page_id, width, height, blob) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(page_id) DO UPDATE SET width = excluded.width, height = excluded.height, blob = excluded.blob",
            params![image.page_id.0.to_string(), image.width, image.height, image.blob],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_image(&self, page_id: PageId) -> CoreResult<Option<PageImage>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let image = conn
            .query_row(
                "SELECT width, height, blob FROM page_images WHERE page_id = ?1",
                params![page_id.0.to_string()],
                |row| {
                    Ok(PageImage {
                        page_id,
                        width: row.get(0)?,
                        height: row.get(1)?,
                        blob: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(image)
    }

    async fn save_artifact(&self, artifact: &PageArtifact) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        conn.execute(
            "INSERT INTO page_artifacts (page_id, format, mime_type, bytes) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(page_id, format) DO UPDATE SET mime_type = excluded.mime_type, bytes = excluded.bytes",
            params![
                artifact.page_id.0.to_string(),
                format_str(artifact.format),
                artifact.mime_type,
                artifact.bytes,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_artifact(&self, page_id: PageId, format: ArtifactFormat) -> CoreResult<Option<PageArtifact>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let artifact = conn
            .query_row(
                "SELECT mime_type, bytes FROM page_artifacts WHERE page_id = ?1 AND format = ?2",
                params![page_id.0.to_string(), format_str(format)],
                |row| {
                    Ok(PageArtifact {
                        page_id,
                        format,
                        mime_type: row.get(0)?,
                        bytes: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(artifact)
    }

    async fn save_extracted_image(&self, image: &ExtractedImage) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        conn.execute(
            "INSERT INTO page_extracted_images (page_id, idx, mime_type, bytes) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(page_id, idx) DO UPDATE SET mime_type = excluded.mime_type, bytes = excluded.bytes",
            params![image.page_id.0.to_string(), image.index, image.mime_type, image.bytes],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_extracted_images(&self, page_id: PageId) -> CoreResult<Vec<ExtractedImage>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT idx, mime_type, bytes FROM page_extracted_images WHERE page_id = ?1 ORDER BY idx ASC")
            .map_err(StoreError::from)?;
        let images = stmt
            .query_map(params![page_id.0.to_string()], |row| {
                Ok(ExtractedImage {
                    page_id,
                    index: row.get(0)?,
                    mime_type: row.get(1)?,
                    bytes: row.get(2)?,
                })
            })
            .map_err(StoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(images)
    }

    async fn save_ocr_record(&self, page_id: PageId, record: &OcrRecord) -> CoreResult<()> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let data = serde_json::to_string(record).map_err(StoreError::from)?;
        conn.execute(
            "INSERT INTO page_ocr (page_id, data) VALUES (?1, ?2)
             ON CONFLICT(page_id) DO UPDATE SET data = excluded.data",
            params![page_id.0.to_string(), data],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_ocr_record(&self, page_id: PageId) -> CoreResult<Option<OcrRecord>> {
        let conn = self.conn.lock().expect("object store lock poisoned");
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM page_ocr WHERE page_id = ?1",
                params![page_id.0.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        data.map(|d| serde_json::from_str(&d).map_err(|e| StoreError::from(e).into()))
            .transpose()
    }

    async fn clear_all_data(&self) -> CoreResult<()> {
        let mut conn = self.conn.lock().expect("object store lock poisoned");
        let tx = conn.transaction().map_err(StoreError::from)?;
        tx.execute_batch(
            "DELETE FROM pages;
             DELETE FROM files;
             DELETE FROM page_images;
             DELETE FROM page_artifacts;
             DELETE FROM page_extracted_images;
             DELETE FROM page_ocr;
             UPDATE counters SET value = 0 WHERE name = 'order';",
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }
}

fn format_str(format: ArtifactFormat) -> &'static str {
    match format {
        ArtifactFormat::Markdown => "markdown",
        ArtifactFormat::Docx => "docx",
        ArtifactFormat::Pdf => "pdf",
    }
}
