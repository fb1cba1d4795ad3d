mod base;
pub mod buffered;
pub mod deepgram;
pub mod whisper;

use std::sync::Arc;

pub use base::{
    MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, STTError, StreamConfig, StreamEvent, StreamWorker,
    StreamingTranscriber, Transcriber, TranscriptionStream, decode_audio_base64,
    extension_for_mime, stream_pair,
};
pub use buffered::{BufferedStreamingTranscriber, pcm16_to_wav};
pub use deepgram::{DeepgramStreamConfig, DeepgramStreamingTranscriber};
pub use whisper::{WhisperConfig, WhisperTranscriber};

use crate::core::retry::RetryPolicy;

/// Supported one-shot STT providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum STTProvider {
    /// OpenAI Whisper REST API
    OpenAI,
}

impl std::fmt::Display for STTProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            STTProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for STTProvider {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "whisper" => Ok(STTProvider::OpenAI),
            _ => Err(STTError::ConfigurationError(format!(
                "Unsupported STT provider: {s}. Supported providers: openai"
            ))),
        }
    }
}

/// Supported streaming STT providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingSTTProvider {
    /// Deepgram live WebSocket API
    Deepgram,
    /// Buffer the stream and use the one-shot provider
    Buffered,
}

impl std::fmt::Display for StreamingSTTProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingSTTProvider::Deepgram => write!(f, "deepgram"),
            StreamingSTTProvider::Buffered => write!(f, "buffered"),
        }
    }
}

impl std::str::FromStr for StreamingSTTProvider {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deepgram" => Ok(StreamingSTTProvider::Deepgram),
            "buffered" | "whisper" | "openai" => Ok(StreamingSTTProvider::Buffered),
            _ => Err(STTError::ConfigurationError(format!(
                "Unsupported streaming STT provider: {s}. Supported providers: deepgram, buffered"
            ))),
        }
    }
}

/// Create a one-shot transcriber by name.
pub fn create_transcriber(
    provider: &str,
    config: WhisperConfig,
    http_client: reqwest::Client,
) -> Result<Arc<dyn Transcriber>, STTError> {
    match provider.parse::<STTProvider>()? {
        STTProvider::OpenAI => Ok(Arc::new(WhisperTranscriber::new(config, http_client))),
    }
}

/// Create a streaming transcriber by name.
///
/// `fallback` backs the buffered provider.
pub fn create_streaming_transcriber(
    provider: &str,
    deepgram: DeepgramStreamConfig,
    retry: RetryPolicy,
    fallback: Arc<dyn Transcriber>,
) -> Result<Arc<dyn StreamingTranscriber>, STTError> {
    match provider.parse::<StreamingSTTProvider>()? {
        StreamingSTTProvider::Deepgram => {
            Ok(Arc::new(DeepgramStreamingTranscriber::new(deepgram, retry)))
        }
        StreamingSTTProvider::Buffered => Ok(Arc::new(BufferedStreamingTranscriber::new(fallback))),
    }
}

pub fn get_supported_stt_providers() -> Vec<&'static str> {
    vec!["openai"]
}

pub fn get_supported_streaming_stt_providers() -> Vec<&'static str> {
    vec!["deepgram", "buffered"]
}
