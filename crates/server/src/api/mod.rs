pub mod file;
pub mod health;
pub mod items;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use carrel_blob::store::BlobStore;
use carrel_state::store::StateStore;

use crate::config::CarrelConfig;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Protocol state backend (items, tickets, quota counters).
    pub state: Arc<dyn StateStore>,
    /// Object store the actual file content lives in.
    pub blobs: Arc<dyn BlobStore>,
    /// Server configuration.
    pub config: Arc<CarrelConfig>,
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Item rows
        .route("/items", post(items::create_item))
        .route(
            "/items/{key}",
            get(items::get_item).patch(items::patch_item),
        )
        // File protocol: authorization, registration, and patch upload all
        // arrive on the same POST, discriminated by their parameters.
        .route(
            "/items/{key}/file",
            post(file::post_file).get(file::download_file),
        )
        .route("/items/{key}/file/view", get(file::view_file))
        // Object store endpoint that upload tickets point at.
        .route(
            "/store/{*key}",
            put(store::put_blob).post(store::post_blob).get(store::get_blob),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
