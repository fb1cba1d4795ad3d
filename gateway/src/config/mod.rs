//! Configuration module for the persona voice gateway
//!
//! Server configuration comes from .env files, YAML files and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use persona_voice_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::guards::GuardConfig;
use crate::core::llm::OpenRouterConfig;
use crate::core::persistence::SupabaseConfig;
use crate::core::retrieval::EmbeddingConfig;
use crate::core::stt::{DeepgramStreamConfig, WhisperConfig};
use crate::core::tts::{OpenAITTSConfig, OpenAITTSModel};
use crate::core::turn_detector::TurnDetectorConfig;
use crate::orchestrator::{OrchestratorSettings, SynthesisGranularity};

pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Parse(String),
    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Server configuration
///
/// Everything needed to run the gateway:
/// - Server settings (host, port)
/// - Provider API keys, models and endpoints (OpenAI, OpenRouter, Deepgram)
/// - Supabase project for personas, transcripts, quota and retrieval
/// - Turn detection thresholds and guard toggles
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Provider API keys
    /// Whisper, speech and embeddings
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,

    // Supabase
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,

    // Provider endpoints
    pub openai_base_url: String,
    pub openrouter_base_url: String,
    pub deepgram_listen_url: String,

    // Models
    pub whisper_model: String,
    pub llm_model: String,
    pub tts_model: String,
    /// Fallback voice when a persona has none
    pub tts_voice: String,
    pub embedding_model: String,

    // Turn pipeline
    /// One-shot STT provider name
    /// Default: "openai"
    pub stt_provider: String,
    /// Streaming STT provider name
    /// Default: None (deepgram when a key is set, buffered otherwise)
    pub stt_streaming_provider: Option<String>,
    /// Upper bound on any single provider call
    /// Default: 30
    pub provider_timeout_seconds: u64,
    pub synthesis_granularity: SynthesisGranularity,
    pub turn_detection: TurnDetectorConfig,
    pub guards: GuardConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            openai_api_key: None,
            openrouter_api_key: None,
            deepgram_api_key: None,
            supabase_url: None,
            supabase_service_role_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            deepgram_listen_url: crate::core::stt::deepgram::DEEPGRAM_LISTEN_URL.to_string(),
            whisper_model: crate::core::stt::whisper::DEFAULT_WHISPER_MODEL.to_string(),
            llm_model: crate::core::llm::openrouter::DEFAULT_OPENROUTER_MODEL.to_string(),
            tts_model: OpenAITTSModel::default().as_str().to_string(),
            tts_voice: "alloy".to_string(),
            embedding_model: crate::core::retrieval::vector::DEFAULT_EMBEDDING_MODEL.to_string(),
            stt_provider: "openai".to_string(),
            stt_streaming_provider: None,
            provider_timeout_seconds: 30,
            synthesis_granularity: SynthesisGranularity::Reply,
            turn_detection: TurnDetectorConfig::default(),
            guards: GuardConfig::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Zeroize every secret when the config goes away.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.openrouter_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.supabase_service_role_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded by `main` before this runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Environment variables (and .env values) form the base, YAML overrides
    /// them, and defaults fill whatever neither sets.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the API key for a provider
    ///
    /// Provider names are case-insensitive.
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        let (name, key) = match provider.to_lowercase().as_str() {
            "openai" | "whisper" => ("OpenAI", &self.openai_api_key),
            "openrouter" => ("OpenRouter", &self.openrouter_api_key),
            "deepgram" => ("Deepgram", &self.deepgram_api_key),
            "supabase" => ("Supabase", &self.supabase_service_role_key),
            _ => return Err(format!("Unsupported provider: {provider}")),
        };
        key.clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| format!("{name} API key not configured in server environment"))
    }

    pub fn has_supabase(&self) -> bool {
        self.supabase_config().is_configured()
    }

    pub fn supabase_config(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.supabase_url.clone().unwrap_or_default(),
            service_role_key: self.supabase_service_role_key.clone().unwrap_or_default(),
        }
    }

    pub fn whisper_config(&self) -> WhisperConfig {
        WhisperConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: self.whisper_model.clone(),
            api_url: join_url(&self.openai_base_url, "audio/transcriptions"),
            language: None,
        }
    }

    pub fn deepgram_config(&self) -> DeepgramStreamConfig {
        DeepgramStreamConfig {
            api_key: self.deepgram_api_key.clone().unwrap_or_default(),
            ws_url: self.deepgram_listen_url.clone(),
            ..Default::default()
        }
    }

    pub fn tts_config(&self) -> OpenAITTSConfig {
        OpenAITTSConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: OpenAITTSModel::from_str_or_default(&self.tts_model),
            voice: self.tts_voice.clone(),
            api_url: join_url(&self.openai_base_url, "audio/speech"),
            ..Default::default()
        }
    }

    pub fn openrouter_config(&self) -> OpenRouterConfig {
        OpenRouterConfig {
            api_key: self.openrouter_api_key.clone().unwrap_or_default(),
            model: self.llm_model.clone(),
            api_url: join_url(&self.openrouter_base_url, "chat/completions"),
        }
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: self.embedding_model.clone(),
            api_url: join_url(&self.openai_base_url, "embeddings"),
            ..Default::default()
        }
    }

    /// Streaming provider to use: explicit setting, else Deepgram when keyed
    pub fn streaming_provider(&self) -> &str {
        match self.stt_streaming_provider.as_deref() {
            Some(provider) => provider,
            None if self.deepgram_api_key.as_deref().is_some_and(|k| !k.is_empty()) => {
                "deepgram"
            }
            None => "buffered",
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            provider_timeout: self.provider_timeout(),
            synthesis: self.synthesis_granularity,
            default_voice: Some(self.tts_voice.clone()),
            guards: self.guards.clone(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}
