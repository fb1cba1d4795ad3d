use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// REST routes
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/minutes", get(api::get_minutes).post(api::record_minutes))
        .route("/turn-detection", get(api::turn_detection_config))
        .layer(TraceLayer::new_for_http())
}
