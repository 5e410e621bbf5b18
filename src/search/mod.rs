//! Vector search against the external semantic index
//!
//! The client is built once at startup and reused across requests. A search
//! runs in three steps: detect the brand filter locally, obtain a query
//! embedding from the backend, then query the index restricted to that
//! brand. The embedding and index calls are retried with exponential
//! backoff; brand detection is pure and is not.

pub mod brand;
pub mod types;

pub use brand::detect_brand;
pub use types::SearchResult;

use anyhow::{anyhow, Context};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use types::{EmbedParameters, EmbedRequest, EmbedResponse, QueryRequest, QueryResponse};

/// Attempts per search, counting the first
const MAX_ATTEMPTS: u32 = 3;

/// Per-request timeout against the backend
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the vector-search backend
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base URL of the backend (exposes `/embed` and `/query`)
    pub base_url: String,
    /// Optional bearer credential
    pub api_key: Option<String>,
    /// Embedding model requested from the backend
    pub embed_model: String,
}

/// Client for the external vector index + embedding provider
pub struct SearchService {
    http: reqwest::Client,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Search(format!("client init failed: {e}")))?;

        Ok(Self { http, config })
    }

    /// Semantic search with brand filtering and bounded retry.
    ///
    /// Empty results from a successful query are valid; only exhausted
    /// retries surface as [`GatewayError::Search`].
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let brand = detect_brand(query);
        let preview: String = query.chars().take(50).collect();
        info!(query = %preview, brand, top_k, "searching");

        let mut last_error = anyhow!("no attempt completed");
        for attempt in 1..=MAX_ATTEMPTS {
            match self.search_once(query, brand, top_k).await {
                Ok(results) => {
                    info!(count = results.len(), "search returned");
                    return Ok(results);
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        let wait = Duration::from_secs(1u64 << (attempt - 1));
                        warn!(
                            attempt,
                            max_attempts = MAX_ATTEMPTS,
                            error = %e,
                            "search attempt failed, retrying in {}s",
                            wait.as_secs()
                        );
                        sleep(wait).await;
                    }
                    last_error = e;
                }
            }
        }

        Err(GatewayError::Search(format!(
            "search failed after {MAX_ATTEMPTS} attempts: {last_error:#}"
        )))
    }

    /// One embed + query round trip.
    async fn search_once(
        &self,
        query: &str,
        brand: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let vector = self.embed(query).await?;

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: json!({ "brand": brand }),
        };

        let response = self
            .post("/query")
            .json(&request)
            .send()
            .await
            .context("index query request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("index query returned status {status}"));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .context("index query response unreadable")?;

        Ok(parsed
            .matches
            .into_iter()
            .map(|m| m.into_result())
            .collect())
    }

    /// Obtain the query embedding from the backend.
    async fn embed(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.embed_model,
            inputs: vec![query],
            // E5-family models require the input type tag
            parameters: EmbedParameters {
                input_type: "query",
            },
        };

        let response = self
            .post("/embed")
            .json(&request)
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("embedding returned status {status}"));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("embedding response unreadable")?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|e| e.values)
            .ok_or_else(|| anyhow!("embedding response contained no vectors"))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}{}", self.config.base_url, path));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}
