//! Company knowledge retrieval.
//!
//! A [`Retriever`] turns a user utterance into a handful of short context
//! passages for the system prompt. Retrieval only enriches a turn; callers
//! degrade to an empty context on any error.

pub mod vector;

use async_trait::async_trait;

pub use vector::{EmbeddingConfig, SupabaseRetriever};

/// Separator between passages in the rendered prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Rendered context when nothing was retrieved.
pub const EMPTY_CONTEXT: &str = "No company-specific context.";

#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ordered context passages for `query`, scoped to a company.
    async fn retrieve(
        &self,
        company_id: Option<&str>,
        query: &str,
    ) -> Result<Vec<String>, RetrievalError>;

    fn provider_name(&self) -> &'static str;
}

/// Join passages for the prompt, skipping blank ones.
pub fn render_context(passages: &[String]) -> String {
    let parts: Vec<&str> = passages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        parts.join(CONTEXT_SEPARATOR)
    }
}

/// Always returns no context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn retrieve(
        &self,
        _company_id: Option<&str>,
        _query: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

/// Returns the same passages for every query that carries a company id.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    passages: Vec<String>,
}

impl StaticRetriever {
    pub fn new<I, S>(passages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passages: passages.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        company_id: Option<&str>,
        _query: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        if company_id.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.passages.clone())
    }

    fn provider_name(&self) -> &'static str {
        "static"
    }
}
