use async_trait::async_trait;
use bytes::Bytes;

/// Text-to-speech errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TTSError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Audio generation failed: {0}")]
    AudioGenerationFailed(String),
}

pub type TTSResult<T> = Result<T, TTSError>;

/// Audio for one complete sentence or reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub bytes: Bytes,
    pub mime: String,
}

/// Speech synthesis capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text`. `voice` overrides the configured default.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TTSResult<SynthesizedAudio>;

    fn provider_name(&self) -> &'static str;
}
