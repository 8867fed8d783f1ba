use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::routes;
use crate::state::AppState;
use crate::ws;

/// Build the Axum application router.
pub fn create_app(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/health", get(routes::health::current_health))
        .route("/api/ingest", post(routes::ingest::ingest_files))
        .route("/api/pages", get(routes::pages::list_pages))
        .route("/api/pages", delete(routes::pages::delete_pages))
        .route("/api/pages/{id}", get(routes::pages::get_page))
        .route("/api/pages/reorder", post(routes::pages::reorder_pages))
        .route("/api/pages/select-all", post(routes::pages::select_all))
        .route("/api/pages/clear-selection", post(routes::pages::clear_selection))
        .route("/api/pages/{id}/toggle-select", post(routes::pages::toggle_select))
        .route("/api/pages/{id}/retry", post(routes::pages::retry))
        .route("/api/pages/{id}/ocr", post(routes::ocr::trigger_ocr))
        .route("/api/ocr/batch", post(routes::ocr::trigger_batch_ocr))
        .route("/api/export", post(routes::export::export_document));

    let ws_route = Router::new().route("/ws", get(ws::ws_handler));

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(200 * 1024 * 1024))
        .with_state(state)
}
