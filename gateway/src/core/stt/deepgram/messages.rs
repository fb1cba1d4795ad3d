//! Deepgram live API message types.

use serde::{Deserialize, Serialize};

use super::super::base::StreamEvent;

/// Server to client messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DeepgramMessage {
    Results(ResultsMessage),
    UtteranceEnd {
        #[serde(default)]
        last_word_end: Option<f64>,
    },
    SpeechStarted,
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    pub channel: ResultsChannel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

impl ResultsMessage {
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|a| a.transcript.as_str())
            .unwrap_or_default()
    }
}

impl DeepgramMessage {
    /// Stream events this message maps onto, in order.
    pub fn to_events(&self) -> Vec<StreamEvent> {
        match self {
            Self::Results(results) => {
                let text = results.transcript().trim();
                let mut events = Vec::with_capacity(2);
                if results.is_final {
                    if !text.is_empty() {
                        events.push(StreamEvent::Final(text.to_string()));
                    }
                    if results.speech_final {
                        events.push(StreamEvent::UtteranceEnd);
                    }
                } else if !text.is_empty() {
                    events.push(StreamEvent::Interim(text.to_string()));
                }
                events
            }
            Self::UtteranceEnd { .. } => vec![StreamEvent::UtteranceEnd],
            Self::SpeechStarted | Self::Metadata { .. } | Self::Unknown => Vec::new(),
        }
    }
}

/// Client to server control messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Flush remaining audio and close
    CloseStream,
    KeepAlive,
}
