//! Common types for the search module

use serde::{Deserialize, Serialize};

/// A single passage retrieved from the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Passage text
    pub text: String,
    /// Brand label the passage is filed under
    pub brand: String,
    /// Document type (product, faq, ...)
    pub doc_type: String,
    /// Source URL, empty when the passage has none
    pub url: String,
    /// Relevance score (0.0 - 1.0)
    pub score: f32,
}

// Wire types for the vector-search backend. Metadata fields are optional on
// the wire and coerced to safe defaults when mapping to `SearchResult`.

#[derive(Debug, Serialize)]
pub struct EmbedRequest<'a> {
    pub model: &'a str,
    pub inputs: Vec<&'a str>,
    pub parameters: EmbedParameters<'a>,
}

#[derive(Debug, Serialize)]
pub struct EmbedParameters<'a> {
    pub input_type: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    pub data: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub include_metadata: bool,
    pub filter: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
pub struct QueryMatch {
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub metadata: Option<MatchMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl QueryMatch {
    /// Map a raw match to a [`SearchResult`], coercing absent metadata to
    /// safe defaults instead of failing.
    pub fn into_result(self) -> SearchResult {
        let meta = self.metadata.unwrap_or_default();
        SearchResult {
            text: meta.text.unwrap_or_default(),
            brand: meta.brand.unwrap_or_else(|| "unknown".to_string()),
            doc_type: meta.doc_type.unwrap_or_else(|| "unknown".to_string()),
            url: meta.url.unwrap_or_default(),
            score: self.score.unwrap_or(0.0),
        }
    }
}
