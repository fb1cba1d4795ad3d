use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

pub mod api;
pub mod voice_session;

/// REST and WebSocket routes with their per-route middleware.
///
/// Server-wide layers (CORS, rate limiting, security headers) are added by
/// the binary. The socket route needs `ConnectInfo<SocketAddr>`, so serve
/// with `into_make_service_with_connect_info`.
pub fn create_app(state: Arc<AppState>) -> Router {
    let voice_routes = voice_session::create_voice_session_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );

    api::create_api_router()
        .merge(voice_routes)
        .with_state(state)
}
