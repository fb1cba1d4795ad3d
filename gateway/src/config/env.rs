//! Environment variable loading

use std::env;
use std::str::FromStr;

use super::{ConfigError, ServerConfig};
use crate::core::turn_detector::TurnDetectorConfig;

/// Read a variable, treating empty values as unset.
pub(super) fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable. Unset is `Ok(None)`, unparseable is an error.
pub(super) fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}

/// Booleans accept true/false, 1/0, yes/no and on/off.
pub(super) fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{raw:?} is not a boolean"),
            }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated list with blanks removed.
pub(super) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Named threshold preset.
pub(super) fn turn_detection_preset(name: &str) -> Result<TurnDetectorConfig, ConfigError> {
    match name.to_lowercase().as_str() {
        "responsive" | "default" => Ok(TurnDetectorConfig::responsive()),
        "patient" => Ok(TurnDetectorConfig::patient()),
        other => Err(ConfigError::InvalidValue {
            name: "turn detection preset".to_string(),
            message: format!("unknown preset {other:?}, expected responsive or patient"),
        }),
    }
}

/// Build a config from the process environment on top of the defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_string("HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse("PORT")? {
        config.port = port;
    }

    config.openai_api_key = env_string("OPENAI_API_KEY");
    config.openrouter_api_key = env_string("OPENROUTER_API_KEY");
    config.deepgram_api_key = env_string("DEEPGRAM_API_KEY");
    config.supabase_url = env_string("SUPABASE_URL");
    config.supabase_service_role_key = env_string("SUPABASE_SERVICE_ROLE_KEY");

    if let Some(url) = env_string("OPENAI_BASE_URL") {
        config.openai_base_url = url;
    }
    if let Some(url) = env_string("OPENROUTER_BASE_URL") {
        config.openrouter_base_url = url;
    }
    if let Some(url) = env_string("DEEPGRAM_LISTEN_URL") {
        config.deepgram_listen_url = url;
    }

    if let Some(model) = env_string("WHISPER_MODEL") {
        config.whisper_model = model;
    }
    if let Some(model) = env_string("LLM_MODEL") {
        config.llm_model = model;
    }
    if let Some(model) = env_string("TTS_MODEL") {
        config.tts_model = model;
    }
    if let Some(voice) = env_string("TTS_VOICE") {
        config.tts_voice = voice;
    }
    if let Some(model) = env_string("EMBEDDING_MODEL") {
        config.embedding_model = model;
    }

    if let Some(provider) = env_string("STT_PROVIDER") {
        config.stt_provider = provider;
    }
    config.stt_streaming_provider = env_string("STT_STREAMING_PROVIDER");
    if let Some(seconds) = env_parse("PROVIDER_TIMEOUT_SECONDS")? {
        config.provider_timeout_seconds = seconds;
    }
    if let Some(granularity) = env_parse("SYNTHESIS_GRANULARITY")? {
        config.synthesis_granularity = granularity;
    }

    load_turn_detection(&mut config.turn_detection)?;
    load_guards(&mut config)?;

    config.cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS");
    if let Some(rps) = env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = env_parse("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    config.max_websocket_connections = env_parse("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(per_ip) = env_parse("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = per_ip;
    }

    Ok(config)
}

fn load_turn_detection(turn: &mut TurnDetectorConfig) -> Result<(), ConfigError> {
    if let Some(preset) = env_string("VAD_PRESET") {
        *turn = turn_detection_preset(&preset)?;
    }
    if let Some(db) = env_parse("VAD_VOICE_THRESHOLD_DB")? {
        turn.voice_threshold_db = db;
    }
    if let Some(ms) = env_parse("VAD_SILENCE_MS")? {
        turn.silence_ms = ms;
    }
    if let Some(ms) = env_parse("VAD_MIN_TURN_MS")? {
        turn.min_turn_ms = ms;
    }
    if let Some(ms) = env_parse("VAD_MIN_SPEECH_MS")? {
        turn.min_speech_ms = ms;
    }
    if let Some(ms) = env_parse("VAD_MAX_LISTEN_MS")? {
        turn.max_listen_ms = ms;
    }
    if let Some(ms) = env_parse("VAD_TICK_INTERVAL_MS")? {
        turn.tick_interval_ms = ms;
    }
    if let Some(len) = env_parse("VAD_MIN_PAYLOAD_BASE64_LEN")? {
        turn.min_payload_base64_len = len;
    }
    Ok(())
}

fn load_guards(config: &mut ServerConfig) -> Result<(), ConfigError> {
    let guards = &mut config.guards;
    if let Some(enabled) = env_bool("GUARD_NON_ENGLISH")? {
        guards.non_english = enabled;
    }
    if let Some(enabled) = env_bool("GUARD_BANNED_PHRASES")? {
        guards.banned_phrases = enabled;
    }
    if let Some(enabled) = env_bool("GUARD_DUPLICATE")? {
        guards.duplicate = enabled;
    }
    if let Some(enabled) = env_bool("GUARD_SHORT_GREETING")? {
        guards.short_greeting = enabled;
    }
    if let Some(phrases) = env_string("GUARD_EXTRA_BANNED_PHRASES") {
        guards.extra_banned_phrases = split_list(&phrases);
    }
    if let Some(ratio) = env_parse("GUARD_NON_ENGLISH_MAX_RATIO")? {
        guards.non_english_max_ratio = ratio;
    }
    Ok(())
}
