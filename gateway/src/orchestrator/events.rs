//! Commands into and events out of a [`TurnOrchestrator`](super::TurnOrchestrator).

use bytes::Bytes;

use super::state::StatusValue;
use crate::core::stt::StreamConfig;
use crate::core::transcript::Role;
use crate::core::tts::SynthesizedAudio;

/// Opens a logical session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub persona_id: String,
    pub conversation_id: Option<String>,
    pub company_id: Option<String>,
}

/// One complete recorded utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub id: Option<String>,
    pub mime: String,
    pub audio: Bytes,
}

/// Everything the orchestrator reacts to.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start(StartRequest),
    Audio(AudioPayload),
    StreamStart(StreamConfig),
    StreamChunk(Bytes),
    StreamEnd,
    Stop,
    Ping,
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Audio(_) => "audio",
            Self::StreamStart(_) => "audio-stream-start",
            Self::StreamChunk(_) => "audio-chunk",
            Self::StreamEnd => "audio-stream-end",
            Self::Stop => "stop",
            Self::Ping => "ping",
        }
    }
}

/// Everything the orchestrator tells the client, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(StatusValue),
    /// Reply text; a fragment while generating, whole for canned replies
    Text { role: Role, text: String },
    /// Final recognized text of the user's utterance
    Transcript(String),
    Tts(SynthesizedAudio),
    Error(String),
    Done,
    Pong,
}

impl SessionEvent {
    pub fn status(value: StatusValue) -> Self {
        Self::Status(value)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Text {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// What the socket loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Close,
}
