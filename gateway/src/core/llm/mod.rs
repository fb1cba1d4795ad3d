mod base;
pub mod openrouter;
pub mod sse;

use std::sync::Arc;

pub use base::{FragmentStream, Generator, LLMError};
pub use openrouter::{OpenRouterConfig, OpenRouterGenerator};
pub use sse::{SseData, SseLineBuffer};

/// Supported generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LLMProvider {
    OpenRouter,
}

impl std::str::FromStr for LLMProvider {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(LLMProvider::OpenRouter),
            _ => Err(LLMError::ConfigurationError(format!(
                "Unsupported LLM provider: {s}. Supported providers: openrouter"
            ))),
        }
    }
}

/// Create a generator by name.
pub fn create_generator(
    provider: &str,
    config: OpenRouterConfig,
    http_client: reqwest::Client,
) -> Result<Arc<dyn Generator>, LLMError> {
    match provider.parse::<LLMProvider>()? {
        LLMProvider::OpenRouter => Ok(Arc::new(OpenRouterGenerator::new(config, http_client))),
    }
}
