use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - the pipeline over JSON
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Pipeline stages
            .route("/intent", post(handlers::api::classify_intent))
            .route("/query", post(handlers::api::answer_query))
            .route("/respond", post(handlers::api::respond))
            // Catalog
            .route("/schema", get(handlers::api::get_schema))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
