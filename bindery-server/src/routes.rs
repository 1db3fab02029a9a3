use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", post(handlers::download_book))
        .route("/api/status/:id", get(handlers::job_status))
        .route("/api/stream/:id", get(handlers::stream_status))
        .route("/api/file/:id", get(handlers::file_redirect))
        .route("/api/file/:id/info", get(handlers::file_info))
        .route("/api/book/:id/info", get(handlers::book_info))
        .route("/api/stats", get(handlers::stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
