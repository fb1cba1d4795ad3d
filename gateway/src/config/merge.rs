//! Applying YAML overrides on top of the environment

use super::env::{load_from_env, turn_detection_preset};
use super::yaml::{
    OrchestratorYaml, ProvidersYaml, SecurityYaml, SupabaseYaml, TurnDetectionYaml, YamlConfig,
};
use super::{ConfigError, ServerConfig};

/// Environment first, then every field the YAML file sets.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }
    if let Some(providers) = yaml.providers {
        merge_providers(&mut config, providers);
    }
    if let Some(supabase) = yaml.supabase {
        merge_supabase(&mut config, supabase);
    }
    if let Some(turn) = yaml.turn_detection {
        merge_turn_detection(&mut config, turn)?;
    }
    if let Some(orchestrator) = yaml.orchestrator {
        merge_orchestrator(&mut config, orchestrator)?;
    }
    if let Some(guards) = yaml.guards {
        config.guards = guards;
    }
    if let Some(security) = yaml.security {
        merge_security(&mut config, security);
    }

    Ok(config)
}

fn merge_providers(config: &mut ServerConfig, yaml: ProvidersYaml) {
    if yaml.openai_api_key.is_some() {
        config.openai_api_key = yaml.openai_api_key;
    }
    if yaml.openrouter_api_key.is_some() {
        config.openrouter_api_key = yaml.openrouter_api_key;
    }
    if yaml.deepgram_api_key.is_some() {
        config.deepgram_api_key = yaml.deepgram_api_key;
    }
    if let Some(url) = yaml.openai_base_url {
        config.openai_base_url = url;
    }
    if let Some(url) = yaml.openrouter_base_url {
        config.openrouter_base_url = url;
    }
    if let Some(url) = yaml.deepgram_listen_url {
        config.deepgram_listen_url = url;
    }
    if let Some(model) = yaml.whisper_model {
        config.whisper_model = model;
    }
    if let Some(model) = yaml.llm_model {
        config.llm_model = model;
    }
    if let Some(model) = yaml.tts_model {
        config.tts_model = model;
    }
    if let Some(voice) = yaml.tts_voice {
        config.tts_voice = voice;
    }
    if let Some(model) = yaml.embedding_model {
        config.embedding_model = model;
    }
}

fn merge_supabase(config: &mut ServerConfig, yaml: SupabaseYaml) {
    if yaml.url.is_some() {
        config.supabase_url = yaml.url;
    }
    if yaml.service_role_key.is_some() {
        config.supabase_service_role_key = yaml.service_role_key;
    }
}

fn merge_turn_detection(
    config: &mut ServerConfig,
    yaml: TurnDetectionYaml,
) -> Result<(), ConfigError> {
    let turn = &mut config.turn_detection;
    if let Some(preset) = yaml.preset {
        *turn = turn_detection_preset(&preset)?;
    }
    if let Some(db) = yaml.voice_threshold_db {
        turn.voice_threshold_db = db;
    }
    if let Some(ms) = yaml.silence_ms {
        turn.silence_ms = ms;
    }
    if let Some(ms) = yaml.min_turn_ms {
        turn.min_turn_ms = ms;
    }
    if let Some(ms) = yaml.min_speech_ms {
        turn.min_speech_ms = ms;
    }
    if let Some(ms) = yaml.max_listen_ms {
        turn.max_listen_ms = ms;
    }
    if let Some(ms) = yaml.tick_interval_ms {
        turn.tick_interval_ms = ms;
    }
    if let Some(len) = yaml.min_payload_base64_len {
        turn.min_payload_base64_len = len;
    }
    Ok(())
}

fn merge_orchestrator(config: &mut ServerConfig, yaml: OrchestratorYaml) -> Result<(), ConfigError> {
    if let Some(seconds) = yaml.provider_timeout_seconds {
        config.provider_timeout_seconds = seconds;
    }
    if let Some(granularity) = yaml.synthesis_granularity {
        config.synthesis_granularity =
            granularity
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    name: "orchestrator.synthesis_granularity".to_string(),
                    message,
                })?;
    }
    if let Some(provider) = yaml.stt_provider {
        config.stt_provider = provider;
    }
    if yaml.stt_streaming_provider.is_some() {
        config.stt_streaming_provider = yaml.stt_streaming_provider;
    }
    Ok(())
}

fn merge_security(config: &mut ServerConfig, yaml: SecurityYaml) {
    if yaml.cors_allowed_origins.is_some() {
        config.cors_allowed_origins = yaml.cors_allowed_origins;
    }
    if let Some(rps) = yaml.rate_limit_requests_per_second {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = yaml.rate_limit_burst_size {
        config.rate_limit_burst_size = burst;
    }
    if yaml.max_websocket_connections.is_some() {
        config.max_websocket_connections = yaml.max_websocket_connections;
    }
    if let Some(per_ip) = yaml.max_connections_per_ip {
        config.max_connections_per_ip = per_ip;
    }
}
