use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scan2doc_core::error::CoreResult;
use scan2doc_core::event_bus::EventBus;
use scan2doc_core::health::HealthMonitor;
use scan2doc_core::page_store::PageStore;
use scan2doc_core::store_api::ObjectStore;
use scan2doc_core::EngineConfig;
use scan2doc_store::SqliteStore;

use crate::docgen::DocGenCoordinator;
use crate::health::HttpHealthProbe;
use crate::ingest::Ingestor;
use crate::ocr::{HttpOcrClient, OcrCoordinator};
use crate::render::{RenderCoordinator, RenderWorkerPool};
use crate::resume::ResumeController;

/// Shared application state: every long-lived component the HTTP/WS
/// layer dispatches into. Built once at startup by [`AppState::bootstrap`]
/// and handed to the router as Axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub bus: Arc<EventBus>,
    pub pages: Arc<PageStore>,
    pub health: Arc<HealthMonitor>,
    pub render: Arc<RenderCoordinator>,
    pub ocr: Arc<OcrCoordinator>,
    pub docgen: Arc<DocGenCoordinator>,
    pub ingestor: Arc<Ingestor>,
    pub config: EngineConfig,
}

impl AppState {
    /// Wires every component from a freshly opened on-disk store and
    /// config, runs the Resume Controller, and starts the background
    /// health poll and the doc-generation auto-trigger. Mirrors the
    /// teacher's `AppState::new` in shape, generalized from one job
    /// queue to the full component graph.
    pub async fn bootstrap(db_path: &Path, config: EngineConfig) -> CoreResult<Arc<Self>> {
        let store: Arc<dyn ObjectStore> = Arc::new(SqliteStore::open(db_path)?);
        Self::bootstrap_with_store(store, config).await
    }

    pub async fn bootstrap_in_memory(config: EngineConfig) -> CoreResult<Arc<Self>> {
        let store: Arc<dyn ObjectStore> = Arc::new(SqliteStore::open_in_memory()?);
        Self::bootstrap_with_store(store, config).await
    }

    async fn bootstrap_with_store(store: Arc<dyn ObjectStore>, config: EngineConfig) -> CoreResult<Arc<Self>> {
        let bus = Arc::new(EventBus::new());
        let pages = Arc::new(PageStore::new(store.clone(), bus.clone()));
        pages.spawn_resume_hook();

        let probe = Arc::new(HttpHealthProbe::new(
            config.health_base_url.as_deref().unwrap_or(&config.ocr_base_url),
            Duration::from_millis(config.health_timeout_ms),
        ));
        let (health, _health_handle) = HealthMonitor::spawn(
            probe,
            bus.clone(),
            Duration::from_millis(config.health_poll_interval_ms),
        );
        let health = Arc::new(health);

        let pool = Arc::new(RenderWorkerPool::spawn(config.render_workers));
        let render = Arc::new(RenderCoordinator::new(
            pool,
            config.render_concurrency,
            store.clone(),
            pages.clone(),
            bus.clone(),
            config.thumbnail_max_edge,
        ));

        let ocr_client = Arc::new(HttpOcrClient::new(config.ocr_base_url.clone(), Duration::from_secs(120)));
        let ocr = Arc::new(OcrCoordinator::new(
            ocr_client,
            config.ocr_concurrency,
            store.clone(),
            pages.clone(),
            bus.clone(),
            health.clone(),
        ));

        let docgen = Arc::new(DocGenCoordinator::new(
            config.gen_concurrency,
            store.clone(),
            pages.clone(),
            bus.clone(),
            config.clone(),
        ));
        docgen.spawn_auto_trigger();

        let ingestor = Arc::new(Ingestor::new(store.clone(), pages.clone(), render.clone(), bus.clone(), config.clone()));

        ResumeController::run(&store, &pages, &render, &ocr, &docgen).await?;

        Ok(Arc::new(Self {
            store,
            bus,
            pages,
            health,
            render,
            ocr,
            docgen,
            ingestor,
            config,
        }))
    }
}
