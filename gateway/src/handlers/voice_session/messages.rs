//! Voice session WebSocket message types
//!
//! Every frame is one JSON object tagged by `type`. Incoming messages are
//! validated and turned into [`SessionCommand`]s; [`SessionEvent`]s map onto
//! [`OutgoingMessage`]s one to one.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::core::stt::{StreamConfig, decode_audio_base64};
use crate::core::transcript::Role;
use crate::orchestrator::{AudioPayload, SessionCommand, SessionEvent, StartRequest, StatusValue};

/// Maximum base64 length of one complete recording (16 MiB)
pub const MAX_AUDIO_BASE64_SIZE: usize = 16 * 1024 * 1024;

/// Maximum base64 length of one streamed chunk (1 MiB)
pub const MAX_CHUNK_BASE64_SIZE: usize = 1024 * 1024;

/// Maximum length of persona, conversation, company and utterance ids
pub const MAX_ID_SIZE: usize = 256;

const DEFAULT_AUDIO_MIME: &str = "audio/webm";

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Open a logical session for a persona
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default)]
        persona_id: String,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        company_id: Option<String>,
    },

    /// One complete recorded utterance
    Audio {
        #[serde(default)]
        id: Option<String>,
        #[serde(default = "default_mime")]
        mime: String,
        base64: String,
    },

    AudioStreamStart(StreamConfig),

    AudioChunk { base64: String },

    AudioStreamEnd,

    Stop,

    Ping,
}

fn default_mime() -> String {
    DEFAULT_AUDIO_MIME.to_string()
}

/// Why an incoming message was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("{field} too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },
    #[error("{0}")]
    InvalidAudio(String),
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), MessageError> {
    let size = value.len();
    if size > max {
        return Err(MessageError::TooLarge { field, size, max });
    }
    Ok(())
}

impl ClientMessage {
    /// Validates field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), MessageError> {
        match self {
            Self::Start {
                persona_id,
                conversation_id,
                company_id,
            } => {
                check_len("personaId", persona_id, MAX_ID_SIZE)?;
                if let Some(id) = conversation_id {
                    check_len("conversationId", id, MAX_ID_SIZE)?;
                }
                if let Some(id) = company_id {
                    check_len("companyId", id, MAX_ID_SIZE)?;
                }
            }
            Self::Audio { id, mime, base64 } => {
                if let Some(id) = id {
                    check_len("id", id, MAX_ID_SIZE)?;
                }
                check_len("mime", mime, MAX_ID_SIZE)?;
                check_len("audio", base64, MAX_AUDIO_BASE64_SIZE)?;
            }
            Self::AudioStreamStart(config) => {
                check_len("encoding", &config.encoding, MAX_ID_SIZE)?;
            }
            Self::AudioChunk { base64 } => {
                check_len("audio chunk", base64, MAX_CHUNK_BASE64_SIZE)?;
            }
            Self::AudioStreamEnd | Self::Stop | Self::Ping => {}
        }
        Ok(())
    }

    /// Decode payloads and produce the orchestrator command.
    pub fn into_command(self) -> Result<SessionCommand, MessageError> {
        let command = match self {
            Self::Start {
                persona_id,
                conversation_id,
                company_id,
            } => SessionCommand::Start(StartRequest {
                persona_id: persona_id.trim().to_string(),
                conversation_id,
                company_id,
            }),
            Self::Audio { id, mime, base64 } => {
                let audio = decode_audio_base64(&base64)
                    .map_err(|e| MessageError::InvalidAudio(e.to_string()))?;
                SessionCommand::Audio(AudioPayload { id, mime, audio })
            }
            Self::AudioStreamStart(config) => SessionCommand::StreamStart(config),
            Self::AudioChunk { base64 } => {
                let chunk = decode_audio_base64(&base64)
                    .map_err(|e| MessageError::InvalidAudio(e.to_string()))?;
                SessionCommand::StreamChunk(chunk)
            }
            Self::AudioStreamEnd => SessionCommand::StreamEnd,
            Self::Stop => SessionCommand::Stop,
            Self::Ping => SessionCommand::Ping,
        };
        Ok(command)
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutgoingMessage {
    Text { role: Role, text: String },
    Transcript { text: String },
    Tts { base64: String, mime: String },
    Status { value: StatusValue },
    Error { message: String },
    Done,
    Pong,
}

impl OutgoingMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for OutgoingMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Status(value) => Self::Status { value },
            SessionEvent::Text { role, text } => Self::Text { role, text },
            SessionEvent::Transcript(text) => Self::Transcript { text },
            SessionEvent::Tts(audio) => Self::Tts {
                base64: BASE64.encode(&audio.bytes),
                mime: audio.mime,
            },
            SessionEvent::Error(message) => Self::Error { message },
            SessionEvent::Done => Self::Done,
            SessionEvent::Pong => Self::Pong,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::SynthesizedAudio;
    use bytes::Bytes;

    #[test]
    fn test_start_deserialization() {
        let json = r#"{"type":"start","personaId":"p1","conversationId":"c1","companyId":"acme"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.into_command().unwrap().name(),
            "start",
        );

        let json = r#"{"type":"start","personaId":" p1 "}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg.into_command().unwrap() {
            SessionCommand::Start(request) => {
                assert_eq!(request.persona_id, "p1");
                assert!(request.conversation_id.is_none());
            }
            other => panic!("Expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_start_without_persona_still_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"start"}"#).unwrap();
        match msg.into_command().unwrap() {
            SessionCommand::Start(request) => assert!(request.persona_id.is_empty()),
            other => panic!("Expected Start, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_strips_data_url_prefix() {
        let json = r#"{"type":"audio","id":"u1","mime":"audio/m4a","base64":"data:audio/m4a;base64,aGVsbG8="}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg.into_command().unwrap() {
            SessionCommand::Audio(payload) => {
                assert_eq!(payload.id.as_deref(), Some("u1"));
                assert_eq!(payload.mime, "audio/m4a");
                assert_eq!(payload.audio, Bytes::from_static(b"hello"));
            }
            other => panic!("Expected Audio, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_defaults_mime() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"audio","base64":"aGVsbG8="}"#).unwrap();
        match msg {
            ClientMessage::Audio { mime, .. } => assert_eq!(mime, "audio/webm"),
            other => panic!("Expected Audio, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_messages() {
        let json = r#"{"type":"audio-stream-start","sampleRate":16000,"channels":1,"encoding":"pcm16"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg.into_command().unwrap() {
            SessionCommand::StreamStart(config) => {
                assert_eq!(config.sample_rate, 16000);
                assert_eq!(config.encoding, "pcm16");
            }
            other => panic!("Expected StreamStart, got {other:?}"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"audio-chunk","base64":"AAEC"}"#).unwrap();
        match msg.into_command().unwrap() {
            SessionCommand::StreamChunk(chunk) => assert_eq!(chunk.as_ref(), &[0, 1, 2]),
            other => panic!("Expected StreamChunk, got {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"audio-stream-end"}"#).unwrap();
        assert_eq!(msg, ClientMessage::AudioStreamEnd);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_invalid_base64() {
        let msg = ClientMessage::AudioChunk {
            base64: "not base64!!".to_string(),
        };
        assert!(matches!(msg.into_command(), Err(MessageError::InvalidAudio(_))));
    }

    #[test]
    fn test_validation_limits() {
        let msg = ClientMessage::AudioChunk {
            base64: "A".repeat(MAX_CHUNK_BASE64_SIZE),
        };
        assert!(msg.validate_size().is_ok());

        let msg = ClientMessage::AudioChunk {
            base64: "A".repeat(MAX_CHUNK_BASE64_SIZE + 1),
        };
        assert!(matches!(
            msg.validate_size(),
            Err(MessageError::TooLarge { field: "audio chunk", .. })
        ));

        let msg = ClientMessage::Start {
            persona_id: "p".repeat(MAX_ID_SIZE + 1),
            conversation_id: None,
            company_id: None,
        };
        let err = msg.validate_size().unwrap_err();
        assert!(err.to_string().starts_with("personaId too large"));
    }

    #[test]
    fn test_outgoing_serialization() {
        let json = serde_json::to_string(&OutgoingMessage::from(SessionEvent::assistant_text(
            "Hello",
        )))
        .unwrap();
        assert_eq!(json, r#"{"type":"text","role":"ai","text":"Hello"}"#);

        let json =
            serde_json::to_string(&OutgoingMessage::from(SessionEvent::status(StatusValue::Ready)))
                .unwrap();
        assert_eq!(json, r#"{"type":"status","value":"ready"}"#);

        let json = serde_json::to_string(&OutgoingMessage::from(SessionEvent::Done)).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);

        let json = serde_json::to_string(&OutgoingMessage::from(SessionEvent::Transcript(
            "hi".into(),
        )))
        .unwrap();
        assert_eq!(json, r#"{"type":"transcript","text":"hi"}"#);
    }

    #[test]
    fn test_tts_is_base64_encoded() {
        let event = SessionEvent::Tts(SynthesizedAudio {
            bytes: Bytes::from_static(b"hello"),
            mime: "audio/mpeg".to_string(),
        });
        assert_eq!(
            OutgoingMessage::from(event),
            OutgoingMessage::Tts {
                base64: "aGVsbG8=".to_string(),
                mime: "audio/mpeg".to_string(),
            }
        );
    }
}
