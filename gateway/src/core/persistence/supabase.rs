//! Supabase REST adapters.
//!
//! One [`SupabaseStore`] backs personas, transcripts and minute quotas
//! through PostgREST, authenticated with the service role key.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{
    Persona, PersistenceError, PersonaStore, QuotaService, TranscriptStore, minutes_for_seconds,
};
use crate::core::transcript::TranscriptRecord;

#[derive(Debug, Clone, Default)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

impl SupabaseConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.service_role_key.is_empty()
    }
}

/// Thin PostgREST client that stamps the auth headers on every request.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_role_key: String,
    http_client: Client,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig, http_client: Client) -> Result<Self, PersistenceError> {
        if !config.is_configured() {
            return Err(PersistenceError::Configuration(
                "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must both be set".to_string(),
            ));
        }
        Ok(Self {
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request against `/rest/v1/{path}`.
    pub fn rest(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, path.trim_start_matches('/'));
        self.http_client
            .request(method, url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    /// POST to a stored procedure.
    pub fn rpc(&self, function: &str, body: &serde_json::Value) -> RequestBuilder {
        self.rest(Method::POST, &format!("rpc/{function}")).json(body)
    }

    /// Send and map transport failures and non-2xx statuses.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, PersistenceError> {
        let response = request
            .send()
            .await
            .map_err(|e| PersistenceError::Network(format!("Request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistenceError::Backend(format!(
            "Supabase returned {status}: {body}"
        )))
    }
}

#[derive(Debug, Deserialize)]
struct BalanceRow {
    #[serde(default)]
    minutes_balance: Option<i64>,
}

/// Personas, transcripts and quotas on Supabase.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SupabaseClient {
        &self.client
    }
}

#[async_trait]
impl PersonaStore for SupabaseStore {
    async fn fetch(&self, persona_id: &str) -> Result<Persona, PersistenceError> {
        let request = self
            .client
            .rest(Method::GET, "personas")
            .query(&[("id", format!("eq.{persona_id}")), ("select", "*".into())]);
        let rows: Vec<Persona> = self
            .client
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::Backend(format!("Bad persona row: {e}")))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| PersistenceError::NotFound(format!("persona {persona_id}")))
    }
}

#[async_trait]
impl TranscriptStore for SupabaseStore {
    async fn save(&self, record: &TranscriptRecord) -> Result<(), PersistenceError> {
        let body = json!({
            "id": record.id,
            "persona_id": record.persona_id,
            "company_id": record.company_id,
            "messages": record.messages,
            "duration_sec": record.duration_sec,
        });
        let request = self
            .client
            .rest(Method::POST, "transcripts")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        self.client.send(request).await?;
        debug!(
            conversation_id = %record.id,
            messages = record.messages.len(),
            "Transcript stored"
        );
        Ok(())
    }
}

#[async_trait]
impl QuotaService for SupabaseStore {
    async fn remaining_minutes(&self, company_id: &str) -> Result<i64, PersistenceError> {
        let request = self.client.rest(Method::GET, "companies").query(&[
            ("id", format!("eq.{company_id}")),
            ("select", "minutes_balance".into()),
        ]);
        let rows: Vec<BalanceRow> = self
            .client
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::Backend(format!("Bad company row: {e}")))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::NotFound(format!("company {company_id}")))?;
        Ok(row.minutes_balance.unwrap_or(0))
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

        let decrement = self.client.rpc(
            "decrement_minutes",
            &json!({ "p_company_id": company_id, "p_minutes": minutes }),
        );
        self.client.send(decrement).await?;

        // ledger rows need a conversation to point at
        if !conversation_id.is_empty() {
            let ledger = self
                .client
                .rest(Method::POST, "usage_ledger")
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "company_id": company_id,
                    "conversation_id": conversation_id,
                    "seconds_used": seconds,
                }));
            self.client.send(ledger).await?;
        }

        info!(company_id, conversation_id, seconds, minutes, "Usage recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_url_and_key() {
        let err = SupabaseClient::new(&SupabaseConfig::default(), Client::new()).unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));

        let config = SupabaseConfig {
            url: "https://db.example.co/".into(),
            service_role_key: "srk".into(),
        };
        let client = SupabaseClient::new(&config, Client::new()).unwrap();
        assert_eq!(client.base_url(), "https://db.example.co");
    }
}
