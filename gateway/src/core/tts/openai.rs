//! OpenAI speech synthesis.
//!
//! API Reference: https://platform.openai.com/docs/api-reference/audio/createSpeech

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::base::{SynthesizedAudio, Synthesizer, TTSError, TTSResult};
use crate::core::stt::whisper::openai_error_message;

pub const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Voices the speech endpoint accepts
pub const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer", "verse",
];

/// Supported OpenAI TTS models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAITTSModel {
    /// Standard quality, lowest latency
    #[default]
    #[serde(rename = "tts-1")]
    Tts1,
    #[serde(rename = "tts-1-hd")]
    Tts1Hd,
    #[serde(rename = "gpt-4o-mini-tts")]
    Gpt4oMiniTts,
}

impl OpenAITTSModel {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tts1 => "tts-1",
            Self::Tts1Hd => "tts-1-hd",
            Self::Gpt4oMiniTts => "gpt-4o-mini-tts",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tts-1" | "tts1" => Self::Tts1,
            "tts-1-hd" | "tts1-hd" | "tts1hd" => Self::Tts1Hd,
            "gpt-4o-mini-tts" | "gpt4o-mini-tts" => Self::Gpt4oMiniTts,
            _ => Self::default(),
        }
    }
}

/// Output container requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutputFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    Pcm,
}

impl AudioOutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/ogg",
            Self::Aac => "audio/aac",
            Self::Flac => "audio/flac",
            Self::Wav => "audio/wav",
            Self::Pcm => "audio/pcm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAITTSConfig {
    pub api_key: String,
    pub model: OpenAITTSModel,
    pub voice: String,
    pub format: AudioOutputFormat,
    pub api_url: String,
}

impl Default for OpenAITTSConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: OpenAITTSModel::default(),
            voice: "alloy".to_string(),
            format: AudioOutputFormat::default(),
            api_url: OPENAI_TTS_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'static str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

/// OpenAI `/v1/audio/speech` adapter.
#[derive(Debug, Clone)]
pub struct OpenAISynthesizer {
    config: OpenAITTSConfig,
    http_client: Client,
}

impl OpenAISynthesizer {
    pub fn new(config: OpenAITTSConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    /// Pick the requested voice when the API knows it, else the default.
    pub fn resolve_voice<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        match requested.map(str::trim).filter(|v| !v.is_empty()) {
            Some(voice) if OPENAI_VOICES.contains(&voice.to_lowercase().as_str()) => voice,
            Some(voice) => {
                warn!(voice, "Unknown OpenAI voice, using default");
                &self.config.voice
            }
            None => &self.config.voice,
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAISynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> TTSResult<SynthesizedAudio> {
        if self.config.api_key.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "OPENAI_API_KEY not set".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "Cannot synthesize empty text".to_string(),
            ));
        }

        let body = SpeechRequest {
            model: self.config.model.as_str(),
            voice: self.resolve_voice(voice),
            input: text,
            response_format: self.config.format.as_str(),
        };

        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TTSError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TTSError::ProviderError(openai_error_message(status, &body)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TTSError::NetworkError(format!("Failed to read audio: {e}")))?;
        if bytes.is_empty() {
            return Err(TTSError::AudioGenerationFailed(
                "Provider returned no audio".to_string(),
            ));
        }

        debug!(chars = text.len(), bytes = bytes.len(), "Synthesized speech");
        Ok(SynthesizedAudio {
            bytes,
            mime: self.config.format.mime_type().to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
