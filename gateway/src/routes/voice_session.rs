//! Voice session WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::voice_session_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the voice session WebSocket router
///
/// # Endpoint
///
/// `GET /voice-session-ws` - WebSocket upgrade for one persona call
///
/// # Example
///
/// ```json
/// // Server greets every connection
/// {"type": "status", "value": "ready"}
///
/// // Client opens a session
/// {"type": "start", "personaId": "cfo-dana", "companyId": "acme"}
///
/// // Client sends an utterance
/// {"type": "audio", "id": "u1", "mime": "audio/m4a", "base64": "..."}
///
/// // Server answers
/// {"type": "status", "value": "listening"}
/// {"type": "transcript", "text": "What does it cost?"}
/// {"type": "status", "value": "thinking"}
/// {"type": "text", "role": "ai", "text": "Depends on"}
/// {"type": "tts", "base64": "...", "mime": "audio/mpeg"}
/// {"type": "status", "value": "speaking"}
/// ```
pub fn create_voice_session_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/voice-session-ws", get(voice_session_handler))
        .layer(TraceLayer::new_for_http())
}
