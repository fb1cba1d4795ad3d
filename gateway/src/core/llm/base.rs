use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Response generation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Lazy, finite, non-restartable sequence of reply fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Streaming chat completion capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start a completion for `user` under `system`.
    ///
    /// Connection and HTTP status failures are returned directly; failures
    /// after the first byte arrive as an `Err` item in the stream.
    async fn generate(&self, system: &str, user: &str) -> Result<FragmentStream, LLMError>;

    fn provider_name(&self) -> &'static str;
}
