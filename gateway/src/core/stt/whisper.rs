//! OpenAI Whisper one-shot transcription.
//!
//! API Reference: https://platform.openai.com/docs/api-reference/audio/createTranscription

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use super::base::{STTError, Transcriber, extension_for_mime};

pub const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
pub const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

/// Whisper adapter settings
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Empty means not configured; calls fail with a configuration error
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    /// ISO-639-1 hint, e.g. "en"
    pub language: Option<String>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_WHISPER_MODEL.to_string(),
            api_url: OPENAI_TRANSCRIPTION_URL.to_string(),
            language: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

/// Turn a non-success OpenAI response body into a readable message.
pub(crate) fn openai_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OpenAIErrorResponse>(body) {
        Ok(parsed) => format!("OpenAI API error ({}): {}", status, parsed.error.message),
        Err(_) => format!("OpenAI API error ({status}): {body}"),
    }
}

/// Whisper transcription over multipart upload.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    http_client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Bytes, mime: &str) -> Result<String, STTError> {
        if audio.is_empty() {
            debug!("Empty audio payload, skipping transcription");
            return Ok(String::new());
        }
        if self.config.api_key.is_empty() {
            return Err(STTError::ConfigurationError(
                "OPENAI_API_KEY not set".to_string(),
            ));
        }

        let ext = extension_for_mime(mime);
        let bytes = audio.len();
        let file_part = Part::bytes(audio.to_vec())
            .file_name(format!("audio.{ext}"))
            .mime_str(mime)
            .map_err(|e| STTError::InvalidAudioFormat(format!("Invalid MIME type {mime}: {e}")))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone());
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        debug!(mime, bytes, ext, "Sending audio to Whisper");
        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| STTError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| STTError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = openai_error_message(status, &body);
            return Err(match status.as_u16() {
                401 | 403 => STTError::AuthenticationFailed(message),
                _ => STTError::ProviderError(message),
            });
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| STTError::ProviderError(format!("Malformed transcription response: {e}")))?;
        let text = parsed.text.trim().to_string();
        info!(chars = text.len(), "Transcription complete");
        Ok(text)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_audio_skips_provider() {
        let stt = WhisperTranscriber::new(WhisperConfig::default(), Client::new());
        let text = stt.transcribe(Bytes::new(), "audio/m4a").await.expect("ok");
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let stt = WhisperTranscriber::new(WhisperConfig::default(), Client::new());
        let result = stt
            .transcribe(Bytes::from_static(b"audio"), "audio/m4a")
            .await;
        assert!(matches!(result, Err(STTError::ConfigurationError(_))));
    }

    #[test]
    fn test_openai_error_message() {
        let msg = openai_error_message(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"bad file","type":"invalid_request_error"}}"#,
        );
        assert!(msg.contains("bad file"));
        let msg = openai_error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(msg.contains("upstream"));
    }
}
