mod base;
pub mod openai;

use std::sync::Arc;

pub use base::{SynthesizedAudio, Synthesizer, TTSError, TTSResult};
pub use openai::{AudioOutputFormat, OpenAISynthesizer, OpenAITTSConfig, OpenAITTSModel};

/// Supported TTS providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TTSProvider {
    /// OpenAI speech endpoint
    OpenAI,
}

impl std::fmt::Display for TTSProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TTSProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl std::str::FromStr for TTSProvider {
    type Err = TTSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(TTSProvider::OpenAI),
            _ => Err(TTSError::InvalidConfiguration(format!(
                "Unsupported TTS provider: {s}. Supported providers: openai"
            ))),
        }
    }
}

/// Create a synthesizer by name.
pub fn create_synthesizer(
    provider: &str,
    config: OpenAITTSConfig,
    http_client: reqwest::Client,
) -> TTSResult<Arc<dyn Synthesizer>> {
    match provider.parse::<TTSProvider>()? {
        TTSProvider::OpenAI => Ok(Arc::new(OpenAISynthesizer::new(config, http_client))),
    }
}
