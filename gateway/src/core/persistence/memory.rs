//! In-process stores.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    Persona, PersistenceError, PersonaStore, QuotaService, TranscriptStore, minutes_for_seconds,
};
use crate::core::transcript::TranscriptRecord;

/// Personas held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPersonaStore {
    personas: DashMap<String, Persona>,
}

impl InMemoryPersonaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, persona: Persona) {
        self.personas.insert(persona.id.clone(), persona);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, persona: Persona) -> Self {
        self.insert(persona);
        self
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

#[async_trait]
impl PersonaStore for InMemoryPersonaStore {
    async fn fetch(&self, persona_id: &str) -> Result<Persona, PersistenceError> {
        self.personas
            .get(persona_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PersistenceError::NotFound(format!("persona {persona_id}")))
    }
}

/// Transcripts held in memory, upserted by conversation id.
#[derive(Debug, Default)]
pub struct InMemoryTranscriptStore {
    records: Mutex<Vec<TranscriptRecord>>,
    saves: Mutex<usize>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored records in insertion order.
    pub fn records(&self) -> Vec<TranscriptRecord> {
        self.records.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<TranscriptRecord> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Number of `save` calls, including overwrites.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn save(&self, record: &TranscriptRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// One charged call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEntry {
    pub company_id: String,
    pub conversation_id: String,
    pub seconds: u64,
    pub minutes: u64,
}

/// Minute balances held in memory.
///
/// Unknown companies report [`PersistenceError::NotFound`].
#[derive(Debug, Default)]
pub struct InMemoryQuota {
    balances: Mutex<HashMap<String, i64>>,
    usage: Mutex<Vec<UsageEntry>>,
}

impl InMemoryQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, company_id: impl Into<String>, minutes: i64) -> Self {
        self.set_balance(company_id, minutes);
        self
    }

    pub fn set_balance(&self, company_id: impl Into<String>, minutes: i64) {
        self.balances.lock().insert(company_id.into(), minutes);
    }

    pub fn balance(&self, company_id: &str) -> Option<i64> {
        self.balances.lock().get(company_id).copied()
    }

    pub fn usage(&self) -> Vec<UsageEntry> {
        self.usage.lock().clone()
    }
}

#[async_trait]
impl QuotaService for InMemoryQuota {
    async fn remaining_minutes(&self, company_id: &str) -> Result<i64, PersistenceError> {
        self.balance(company_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("company {company_id}")))
    }

    async fn record_usage(
        &self,
        company_id: &str,
        conversation_id: &str,
        seconds: u64,
    ) -> Result<(), PersistenceError> {
        let minutes = minutes_for_seconds(seconds);
        if minutes == 0 {
            return Ok(());
        }
        {
            let mut balances = self.balances.lock();
            let balance = balances.entry(company_id.to_string()).or_insert(0);
            *balance -= minutes as i64;
        }
        self.usage.lock().push(UsageEntry {
            company_id: company_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seconds,
            minutes,
        });
        Ok(())
    }
}

/// Quota that never runs out and records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaService for UnlimitedQuota {
    async fn remaining_minutes(&self, _company_id: &str) -> Result<i64, PersistenceError> {
        Ok(i64::MAX)
    }

    async fn record_usage(
        &self,
        _company_id: &str,
        _conversation_id: &str,
        _seconds: u64,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}
