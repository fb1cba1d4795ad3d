//! Configuration validation logic

use super::{ConfigError, ServerConfig};
use crate::core::stt::{STTProvider, StreamingSTTProvider};

pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    config
        .turn_detection
        .validate()
        .map_err(|e| ConfigError::Validation(format!("turn_detection: {e}")))?;

    if config.provider_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "provider_timeout_seconds must be greater than 0".to_string(),
        ));
    }

    let ratio = config.guards.non_english_max_ratio;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(ConfigError::Validation(format!(
            "guards.non_english_max_ratio must be between 0 and 1, got {ratio}"
        )));
    }

    config
        .stt_provider
        .parse::<STTProvider>()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    config
        .streaming_provider()
        .parse::<StreamingSTTProvider>()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;

    validate_supabase(config)?;

    if config.rate_limit_requests_per_second == 0 {
        return Err(ConfigError::Validation(
            "rate_limit_requests_per_second must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Supabase is all or nothing.
fn validate_supabase(config: &ServerConfig) -> Result<(), ConfigError> {
    match (&config.supabase_url, &config.supabase_service_role_key) {
        (Some(_), None) => Err(ConfigError::Validation(
            "SUPABASE_URL is set but SUPABASE_SERVICE_ROLE_KEY is missing".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::Validation(
            "SUPABASE_SERVICE_ROLE_KEY is set but SUPABASE_URL is missing".to_string(),
        )),
        (Some(url), Some(_)) => url::Url::parse(url).map(|_| ()).map_err(|e| {
            ConfigError::Validation(format!("SUPABASE_URL is not a valid URL: {e}"))
        }),
        (None, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_half_configured_supabase() {
        let mut config = ServerConfig::default();
        config.supabase_url = Some("https://p.supabase.co".to_string());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_SERVICE_ROLE_KEY"));

        config.supabase_service_role_key = Some("srk".to_string());
        assert!(validate(&config).is_ok());

        config.supabase_url = Some("not a url".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = ServerConfig::default();
        config.stt_streaming_provider = Some("carrier-pigeon".to_string());
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unsupported streaming STT provider"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ServerConfig::default();
        config.provider_timeout_seconds = 0;
        assert!(validate(&config).is_err());
    }
}
