//! Chat pipeline orchestrator
//!
//! Composes the cache, the search client and the LLM client into the
//! end-to-end flow, in bulk and streaming modes. Owns the control flow and
//! the cache-write decision: the cache is read first, written last, at most
//! once per request, and only after generation fully completes. Contains no
//! admission or guard logic — that runs before a query reaches this service.

use futures::{pin_mut, Stream, StreamExt};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CachedResponse, ResponseCache};
use crate::error::Result;
use crate::llm::LlmService;
use crate::search::{SearchResult, SearchService};

/// Fixed refusal returned when a query trips the injection guard
pub const REFUSAL_MESSAGE: &str = "Bu sorguyu işleyemiyorum. Lütfen farklı bir soru sorun.";

/// Context handed to the LLM when retrieval finds nothing
const NO_CONTEXT_FALLBACK: &str = "Veritabanında ilgili bilgi bulunamadı.";

/// Passages requested per query
const DEFAULT_TOP_K: usize = 3;

/// Outcome of the bulk pipeline
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: String,
    pub sources: Vec<String>,
    pub cached: bool,
}

/// Orchestrates the cache → search → LLM → cache pipeline
pub struct ChatService {
    search: Arc<SearchService>,
    llm: Arc<LlmService>,
    cache: Arc<ResponseCache>,
}

impl ChatService {
    pub fn new(
        search: Arc<SearchService>,
        llm: Arc<LlmService>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self { search, llm, cache }
    }

    /// Answer a query through the full pipeline.
    ///
    /// Cache hit short-circuits; a miss runs retrieval and generation, then
    /// writes the cache exactly once.
    pub async fn respond(&self, query: &str) -> Result<ChatOutcome> {
        let preview: String = query.chars().take(50).collect();

        if let Some(hit) = self.cache.get(query).await {
            info!(query = %preview, "cache HIT");
            return Ok(ChatOutcome {
                response: hit.response,
                sources: hit.sources,
                cached: true,
            });
        }
        info!(query = %preview, "cache MISS");

        let results = self.search.search(query, DEFAULT_TOP_K).await?;
        let context = format_context(&results);
        let sources = extract_sources(&results);

        let response = self.llm.generate(query, &context).await?;

        self.cache
            .set(
                query,
                &CachedResponse {
                    response: response.clone(),
                    sources: sources.clone(),
                },
            )
            .await;

        Ok(ChatOutcome {
            response,
            sources,
            cached: false,
        })
    }

    /// Answer a query as a fragment stream.
    ///
    /// A cache hit is re-emitted word by word so client consumption is
    /// uniform across hit and miss. On a miss the generated tokens are
    /// forwarded as they arrive and buffered; the cache is written only
    /// after the stream completes cleanly. Dropping the stream (client
    /// disconnect) or a mid-stream failure discards the partial buffer.
    pub fn respond_stream(
        &self,
        query: String,
    ) -> impl Stream<Item = Result<String>> + Send + 'static {
        let search = Arc::clone(&self.search);
        let llm = Arc::clone(&self.llm);
        let cache = Arc::clone(&self.cache);

        async_stream::stream! {
            let preview: String = query.chars().take(50).collect();

            if let Some(hit) = cache.get(&query).await {
                info!(query = %preview, "stream cache HIT");
                for word in hit.response.split(' ') {
                    yield Ok(format!("{word} "));
                }
                return;
            }
            info!(query = %preview, "stream cache MISS");

            let results = match search.search(&query, DEFAULT_TOP_K).await {
                Ok(results) => results,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let context = format_context(&results);
            let sources = extract_sources(&results);

            let mut full_response = String::new();
            let tokens = llm.generate_stream(&query, &context);
            pin_mut!(tokens);

            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        full_response.push_str(&token);
                        yield Ok(token);
                    }
                    Err(e) => {
                        // Partial output is never cached
                        yield Err(e);
                        return;
                    }
                }
            }

            cache
                .set(
                    &query,
                    &CachedResponse {
                        response: full_response,
                        sources,
                    },
                )
                .await;
            info!(query = %preview, "stream response cached");
        }
    }
}

/// Render retrieval results into the context block handed to the LLM.
///
/// Ranked entries with source index, score, brand and passage text, joined
/// with a visible separator so the model can tell passages apart.
pub fn format_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT_FALLBACK.to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let mut part = format!(
                "[Kaynak {}] (Skor: {:.2})\nMarka: {}\nİçerik: {}",
                i + 1,
                result.score,
                result.brand,
                result.text
            );
            if !result.url.is_empty() {
                part.push_str(&format!("\nURL: {}", result.url));
            }
            part
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Ordered unique non-empty source URLs, first-seen order.
pub fn extract_sources(results: &[SearchResult]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for result in results {
        if !result.url.is_empty() && !urls.contains(&result.url) {
            urls.push(result.url.clone());
        }
    }
    urls
}
