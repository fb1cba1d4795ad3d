//! Persona, transcript and quota collaborators.
//!
//! The orchestrator only depends on the traits here. [`supabase`] talks to
//! Supabase REST; [`memory`] keeps everything in-process for tests and for
//! running without a database.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::transcript::TranscriptRecord;

pub use memory::{InMemoryPersonaStore, InMemoryQuota, InMemoryTranscriptStore, UnlimitedQuota};
pub use supabase::{SupabaseClient, SupabaseConfig, SupabaseStore};

/// Persistence errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A role-play persona card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub role: String,
    /// Backstory
    #[serde(default, deserialize_with = "null_as_empty")]
    pub prompt: String,
    /// TTS voice override
    #[serde(default)]
    pub voice: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Persona {
    pub fn name(&self) -> Option<&str> {
        Some(self.name.trim()).filter(|s| !s.is_empty())
    }

    pub fn role(&self) -> Option<&str> {
        Some(self.role.trim()).filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Load a persona, or [`PersistenceError::NotFound`].
    async fn fetch(&self, persona_id: &str) -> Result<Persona, PersistenceError>;
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Store a finished conversation. Idempotent on `record.id`.
    async fn save(&self, record: &TranscriptRecord) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Minutes left for a company. Zero or less means exhausted.
    async fn remaining_minutes(&self, company_id: &str) -> Result<i64, PersistenceError>;

    /// Charge a finished call against the company's balance.
    async fn record_usage(
        &self,
        company_id: &str,
        conversation_id: &str,
        seconds: u64,
    ) -> Result<(), PersistenceError>;
}

/// Billable minutes for a call length; partial minutes round up.
pub fn minutes_for_seconds(seconds: u64) -> u64 {
    seconds.div_ceil(60)
}
