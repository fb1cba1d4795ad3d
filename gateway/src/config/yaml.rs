use serde::Deserialize;
use std::path::PathBuf;

use super::ConfigError;
use crate::core::guards::GuardConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Anything set here
/// overrides the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 10000
///
/// providers:
///   openai_api_key: "sk-..."
///   openrouter_api_key: "sk-or-..."
///   deepgram_api_key: "dg-..."
///   llm_model: "google/gemini-3-pro-preview"
///   tts_voice: "alloy"
///
/// supabase:
///   url: "https://project.supabase.co"
///   service_role_key: "service-role-key"
///
/// turn_detection:
///   silence_ms: 1200
///   voice_threshold_db: -45
///
/// orchestrator:
///   provider_timeout_seconds: 30
///   synthesis_granularity: "sentence"
///   stt_streaming_provider: "deepgram"
///
/// guards:
///   duplicate: false
///   extra_banned_phrases:
///     - "smash that like button"
///
/// security:
///   cors_allowed_origins: "*"
///   rate_limit_requests_per_second: 60
///   max_connections_per_ip: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub supabase: Option<SupabaseYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub orchestrator: Option<OrchestratorYaml>,
    pub guards: Option<GuardConfig>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Provider keys, models and endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    /// Whisper, speech and embeddings
    pub openai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    /// Streaming transcription
    pub deepgram_api_key: Option<String>,
    /// Base URL for the OpenAI API, e.g. "https://api.openai.com/v1"
    pub openai_base_url: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub deepgram_listen_url: Option<String>,
    pub whisper_model: Option<String>,
    pub llm_model: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub embedding_model: Option<String>,
}

/// Supabase project from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SupabaseYaml {
    pub url: Option<String>,
    pub service_role_key: Option<String>,
}

/// Turn detection thresholds from YAML
///
/// A `preset` of "responsive" or "patient" is applied first, then the
/// individual fields.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    pub preset: Option<String>,
    pub voice_threshold_db: Option<f32>,
    pub silence_ms: Option<u64>,
    pub min_turn_ms: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub max_listen_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub min_payload_base64_len: Option<usize>,
}

/// Turn pipeline settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorYaml {
    pub provider_timeout_seconds: Option<u64>,
    /// "reply" or "sentence"
    pub synthesis_granularity: Option<String>,
    /// "openai"
    pub stt_provider: Option<String>,
    /// "deepgram" or "buffered"
    pub stt_streaming_provider: Option<String>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML config: {e}")))
    }
}
