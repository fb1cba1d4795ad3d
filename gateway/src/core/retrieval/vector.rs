//! Embedding search over Supabase `match_documents`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RetrievalError, Retriever};
use crate::core::persistence::SupabaseClient;

pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_MATCH_COUNT: usize = 4;

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
    pub match_count: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_url: OPENAI_EMBEDDINGS_URL.to_string(),
            match_count: DEFAULT_MATCH_COUNT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct MatchRow {
    #[serde(default)]
    content: Option<String>,
}

/// Embeds the query with OpenAI and asks Supabase for the nearest chunks.
#[derive(Debug, Clone)]
pub struct SupabaseRetriever {
    config: EmbeddingConfig,
    supabase: SupabaseClient,
    http_client: Client,
}

impl SupabaseRetriever {
    pub fn new(config: EmbeddingConfig, supabase: SupabaseClient, http_client: Client) -> Self {
        Self {
            config,
            supabase,
            http_client,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if self.config.api_key.is_empty() {
            return Err(RetrievalError::Configuration(
                "OPENAI_API_KEY not set".to_string(),
            ));
        }

        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "model": self.config.model, "input": text }))
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Embedding(format!(
                "Embedding failed ({status})"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("Bad response: {e}")))?;
        Ok(parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Retriever for SupabaseRetriever {
    async fn retrieve(
        &self,
        company_id: Option<&str>,
        query: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        let Some(company_id) = company_id.filter(|id| !id.is_empty()) else {
            return Ok(Vec::new());
        };

        let embedding = self.embed(query).await?;
        let request = self.supabase.rpc(
            "match_documents",
            &json!({
                "query_embedding": embedding,
                "company_id": company_id,
                "match_count": self.config.match_count,
            }),
        );
        let rows: Vec<MatchRow> = self
            .supabase
            .send(request)
            .await
            .map_err(|e| RetrievalError::Lookup(e.to_string()))?
            .json()
            .await
            .map_err(|e| RetrievalError::Lookup(format!("Bad rows: {e}")))?;

        let passages: Vec<String> = rows.into_iter().filter_map(|row| row.content).collect();
        debug!(company_id, passages = passages.len(), "Context retrieved");
        Ok(passages)
    }

    fn provider_name(&self) -> &'static str {
        "supabase"
    }
}
