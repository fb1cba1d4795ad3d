//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check, minutes balance and turn detection thresholds
//! - `voice_session` - Persona voice session WebSocket

pub mod api;
pub mod voice_session;

pub use voice_session::voice_session_handler;
