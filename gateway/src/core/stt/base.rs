use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Speech-to-text errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum STTError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),
    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),
    #[error("Transcription stream closed")]
    StreamClosed,
}

/// One-shot transcription of a complete recording.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Recognize speech in `audio`.
    ///
    /// Unintelligible or empty audio yields an empty string, not an error.
    async fn transcribe(&self, audio: Bytes, mime: &str) -> Result<String, STTError>;

    fn provider_name(&self) -> &'static str;
}

/// Negotiated once by `audio-stream-start`; immutable for the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_channels() -> u16 {
    1
}

fn default_encoding() -> String {
    "linear16".to_string()
}

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 48_000;

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: default_channels(),
            encoding: default_encoding(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), STTError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(STTError::ConfigurationError(format!(
                "Sample rate {} Hz is outside supported range ({}-{} Hz)",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(STTError::ConfigurationError(format!(
                "Unsupported channel count: {}",
                self.channels
            )));
        }
        if self.encoding.trim().is_empty() {
            return Err(STTError::InvalidAudioFormat("encoding is empty".to_string()));
        }
        Ok(())
    }

    /// Raw 16-bit little-endian PCM
    pub fn is_linear16(&self) -> bool {
        matches!(
            self.encoding.to_lowercase().as_str(),
            "linear16" | "pcm16" | "pcm_s16le" | "pcm" | "s16le"
        )
    }
}

/// Events produced by a streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Tentative text, may still change
    Interim(String),
    /// A finalized stretch of text
    Final(String),
    /// The provider detected the end of the utterance
    UtteranceEnd,
    Error(String),
    /// No more events will follow
    Closed,
}

/// Caller side of a streaming transcription session.
#[derive(Debug)]
pub struct TranscriptionStream {
    audio_tx: Option<mpsc::Sender<Bytes>>,
    events_rx: mpsc::Receiver<StreamEvent>,
}

/// Provider side of a streaming transcription session.
#[derive(Debug)]
pub struct StreamWorker {
    pub audio_rx: mpsc::Receiver<Bytes>,
    pub events_tx: mpsc::Sender<StreamEvent>,
}

/// Connected caller/provider halves with bounded buffers.
pub fn stream_pair(buffer: usize) -> (TranscriptionStream, StreamWorker) {
    let (audio_tx, audio_rx) = mpsc::channel(buffer);
    let (events_tx, events_rx) = mpsc::channel(buffer);
    (
        TranscriptionStream {
            audio_tx: Some(audio_tx),
            events_rx,
        },
        StreamWorker {
            audio_rx,
            events_tx,
        },
    )
}

impl TranscriptionStream {
    /// Forward one audio frame to the provider.
    pub async fn send_audio(&self, frame: Bytes) -> Result<(), STTError> {
        let tx = self.audio_tx.as_ref().ok_or(STTError::StreamClosed)?;
        tx.send(frame).await.map_err(|_| STTError::StreamClosed)
    }

    /// A clone of the audio sender, for pumping from another task.
    pub fn audio_sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.audio_tx.clone()
    }

    /// Signal end of audio. The provider flushes and then closes.
    pub fn finish_audio(&mut self) {
        self.audio_tx = None;
    }

    pub fn is_audio_open(&self) -> bool {
        self.audio_tx.is_some()
    }

    /// Next provider event; `None` once the provider side is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events_rx.recv().await
    }
}

/// Opens streaming sessions against a provider.
#[async_trait]
pub trait StreamingTranscriber: Send + Sync {
    async fn open(&self, config: StreamConfig) -> Result<TranscriptionStream, STTError>;

    fn provider_name(&self) -> &'static str;
}

/// Decode a base64 audio payload, tolerating a `data:...;base64,` prefix.
pub fn decode_audio_base64(input: &str) -> Result<Bytes, STTError> {
    let cleaned = match input.rfind(',') {
        Some(idx) => &input[idx + 1..],
        None => input,
    };
    BASE64
        .decode(cleaned.trim())
        .map(Bytes::from)
        .map_err(|e| STTError::InvalidAudioFormat(format!("Invalid base64 audio: {e}")))
}

/// File extension the transcription API expects for a mime type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let mime = mime.to_lowercase();
    if mime.contains("m4a") || mime.contains("mp4") {
        "m4a"
    } else if mime.contains("wav") {
        "wav"
    } else if mime.contains("ogg") {
        "ogg"
    } else {
        "webm"
    }
}
