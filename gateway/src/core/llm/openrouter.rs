//! OpenRouter streaming chat completions.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::base::{FragmentStream, Generator, LLMError};
use super::sse::{SseData, SseLineBuffer};

pub const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-3-pro-preview";

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            api_url: OPENROUTER_CHAT_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text carried by one SSE payload, if any. Malformed payloads yield `None`.
pub fn fragment_from_payload(payload: &str) -> Option<String> {
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|text| !text.is_empty()),
        Err(e) => {
            debug!("Skipping malformed stream chunk: {}", e);
            None
        }
    }
}

/// OpenRouter-backed [`Generator`].
#[derive(Debug, Clone)]
pub struct OpenRouterGenerator {
    config: OpenRouterConfig,
    http_client: Client,
}

impl OpenRouterGenerator {
    pub fn new(config: OpenRouterConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<FragmentStream, LLMError> {
        if self.config.api_key.is_empty() {
            return Err(LLMError::ConfigurationError(
                "OPENROUTER_API_KEY not set".to_string(),
            ));
        }

        let request = ChatRequest {
            model: &self.config.model,
            stream: true,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!(
                "Generation failed ({status}): {body}"
            )));
        }

        let model = self.config.model.clone();
        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::new();
            let mut fragments = 0usize;
            'read: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(model = %model, "Generation stream broke: {}", e);
                        yield Err(LLMError::StreamError(e.to_string()));
                        break 'read;
                    }
                };
                for data in lines.push(&chunk) {
                    match data {
                        SseData::Done => break 'read,
                        SseData::Payload(payload) => {
                            if let Some(text) = fragment_from_payload(&payload) {
                                fragments += 1;
                                yield Ok(text);
                            }
                        }
                    }
                }
            }
            if let Some(SseData::Payload(payload)) = lines.finish() {
                if let Some(text) = fragment_from_payload(&payload) {
                    fragments += 1;
                    yield Ok(text);
                }
            }
            debug!(model = %model, fragments, "Generation stream finished");
        };

        Ok(Box::pin(stream))
    }

    fn provider_name(&self) -> &'static str {
        "openrouter"
    }
}
