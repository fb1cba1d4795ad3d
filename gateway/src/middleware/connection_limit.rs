//! Connection limit middleware for the voice session socket
//!
//! Enforces a global cap on concurrent sessions and a per-IP cap.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use persona_voice_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/voice-session-ws", get(voice_session_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address carried to the handler, which releases the slot when the
/// session ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Reserve a session slot for WebSocket upgrades.
///
/// Global limit reached is 503, per-IP limit reached is 429. Plain HTTP
/// requests pass through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting voice session: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "Rejecting voice session: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, routing::get};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ws", get(|| async { "upgraded" }))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
    }

    fn request(upgrade: bool, ip: Ipv4Addr) -> Request<Body> {
        let mut builder = Request::builder().uri("/ws");
        if upgrade {
            builder = builder
                .header(header::UPGRADE, "websocket")
                .header(header::CONNECTION, "upgrade");
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        request
    }

    fn state(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        AppState::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_plain_requests_bypass_limits() {
        let state = state(Some(0), 0);
        let response = app(state.clone())
            .oneshot(request(false, Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_per_ip_limit_returns_429() {
        let state = state(None, 1);
        let ip = Ipv4Addr::new(192, 168, 1, 100);

        let first = app(state.clone()).oneshot(request(true, ip)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(state.connections_for(IpAddr::V4(ip)), 1);

        let second = app(state.clone()).oneshot(request(true, ip)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app(state.clone())
            .oneshot(request(true, Ipv4Addr::new(192, 168, 1, 101)))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_global_limit_returns_503() {
        let state = state(Some(1), 10);

        let first = app(state.clone())
            .oneshot(request(true, Ipv4Addr::new(10, 0, 0, 1)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app(state.clone())
            .oneshot(request(true, Ipv4Addr::new(10, 0, 0, 2)))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
