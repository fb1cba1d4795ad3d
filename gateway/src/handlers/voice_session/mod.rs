//! Persona voice session over WebSocket
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **start** `{personaId, conversationId?, companyId?}`: open a session
//! - **audio** `{id, mime, base64}`: one complete utterance
//! - **audio-stream-start** `{sampleRate, channels, encoding}`: begin a streamed utterance
//! - **audio-chunk** `{base64}`: raw audio for the open stream
//! - **audio-stream-end**: no more audio for this utterance
//! - **stop**: persist the transcript and close
//! - **ping**
//! - **Binary frames**: raw audio, same as `audio-chunk`
//!
//! ## Server → Client
//!
//! - **status** `{value}`: ready, listening, thinking or speaking
//! - **transcript** `{text}`: what the user said
//! - **text** `{role, text}`: reply fragments
//! - **tts** `{base64, mime}`: one complete sentence or reply of speech
//! - **error** `{message}`
//! - **done**: sent once after `stop`, followed by a close frame
//! - **pong**

mod handler;
pub mod messages;

pub use handler::voice_session_handler;
