//! Shared application state
//!
//! Providers are built once here so every session shares one HTTP connection
//! pool. Without Supabase the gateway falls back to in-memory stores, which is
//! enough for local runs and tests.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::llm::{LLMError, create_generator};
use crate::core::persistence::{
    InMemoryPersonaStore, InMemoryTranscriptStore, PersistenceError, SupabaseClient,
    SupabaseStore, UnlimitedQuota,
};
use crate::core::retrieval::{NoopRetriever, Retriever, SupabaseRetriever};
use crate::core::retry::RetryPolicy;
use crate::core::stt::{STTError, create_streaming_transcriber, create_transcriber};
use crate::core::tts::{TTSError, create_synthesizer};
use crate::orchestrator::{OrchestratorSettings, Providers};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("STT setup failed: {0}")]
    Stt(#[from] STTError),
    #[error("TTS setup failed: {0}")]
    Tts(#[from] TTSError),
    #[error("LLM setup failed: {0}")]
    Llm(#[from] LLMError),
    #[error("Persistence setup failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionLimitError {
    #[error("global connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    pub providers: Providers,
    pub orchestrator_settings: OrchestratorSettings,
    active_connections: AtomicUsize,
    connections_per_ip: DashMap<IpAddr, u32>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("providers", &self.providers)
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build every provider from configuration.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, StateError> {
        let providers = build_providers(&config)?;
        info!(?providers, "Providers initialized");
        Ok(Self::with_providers(config, providers))
    }

    /// State around caller-supplied providers.
    pub fn with_providers(config: ServerConfig, providers: Providers) -> Arc<Self> {
        let orchestrator_settings = config.orchestrator_settings();
        Arc::new(Self {
            config,
            providers,
            orchestrator_settings,
            active_connections: AtomicUsize::new(0),
            connections_per_ip: DashMap::new(),
        })
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn connections_for(&self, ip: IpAddr) -> u32 {
        self.connections_per_ip.get(&ip).map(|c| *c).unwrap_or(0)
    }

    /// Reserve a WebSocket slot for `ip`.
    ///
    /// Every successful call must be paired with [`release_connection`](Self::release_connection).
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let max_global = self.config.max_websocket_connections;
        let reserved = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match max_global {
                    Some(max) if current >= max => None,
                    _ => Some(current + 1),
                }
            });
        if reserved.is_err() {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let max_per_ip = self.config.max_connections_per_ip;
        let mut entry = self.connections_per_ip.entry(ip).or_insert(0);
        if *entry >= max_per_ip {
            drop(entry);
            self.active_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *entry += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.connections_per_ip.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }
}

/// Wire concrete providers from configuration.
pub fn build_providers(config: &ServerConfig) -> Result<Providers, StateError> {
    let http = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()?;

    let transcriber = create_transcriber(&config.stt_provider, config.whisper_config(), http.clone())?;
    let streaming = create_streaming_transcriber(
        config.streaming_provider(),
        config.deepgram_config(),
        RetryPolicy::default(),
        Arc::clone(&transcriber),
    )?;
    let generator = create_generator("openrouter", config.openrouter_config(), http.clone())?;
    let synthesizer = create_synthesizer("openai", config.tts_config(), http.clone())?;

    if config.get_api_key("openai").is_err() {
        warn!("OPENAI_API_KEY not set; transcription and speech calls will fail");
    }
    if config.get_api_key("openrouter").is_err() {
        warn!("OPENROUTER_API_KEY not set; generation calls will fail");
    }

    if config.has_supabase() {
        let client = SupabaseClient::new(&config.supabase_config(), http.clone())?;
        let store = Arc::new(SupabaseStore::new(client.clone()));
        let retriever: Arc<dyn Retriever> = if config.get_api_key("openai").is_ok() {
            Arc::new(SupabaseRetriever::new(config.embedding_config(), client, http))
        } else {
            Arc::new(NoopRetriever)
        };
        Ok(Providers {
            transcriber,
            streaming,
            retriever,
            generator,
            synthesizer,
            personas: store.clone(),
            transcripts: store.clone(),
            quota: store,
        })
    } else {
        warn!("Supabase not configured; using in-memory personas and transcripts");
        Ok(Providers {
            transcriber,
            streaming,
            retriever: Arc::new(NoopRetriever),
            generator,
            synthesizer,
            personas: Arc::new(InMemoryPersonaStore::new()),
            transcripts: Arc::new(InMemoryTranscriptStore::new()),
            quota: Arc::new(UnlimitedQuota),
        })
    }
}
