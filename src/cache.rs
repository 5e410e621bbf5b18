//! Response cache — de-duplicates identical queries
//!
//! A normalized query maps to a fixed-length fingerprint key; the stored
//! value is the full `(answer, sources)` pair as JSON. Entries expire after
//! a short TTL and are only ever replaced wholesale on the next miss.
//!
//! Caching is an optimization, not a correctness requirement: store failures
//! are logged and degrade to miss/no-op, and the pipeline continues uncached.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::store::KvStore;

/// How long a cached response stays fresh
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Namespace prefix for cache keys
const KEY_NAMESPACE: &str = "chat:cache";

/// The cached `(answer, sources)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: String,
    pub sources: Vec<String>,
}

/// KV-backed response cache with deterministic fingerprint keys
pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Derive the cache key: lowercase-trim the query, hash, prefix.
    ///
    /// Different surface forms of the same query normalize to the same key.
    fn make_key(query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        format!("{}:{:x}", KEY_NAMESPACE, hasher.finalize())
    }

    /// Look up a cached response. Returns `None` on miss, expiry, store
    /// failure or a payload that no longer deserializes.
    pub async fn get(&self, query: &str) -> Option<CachedResponse> {
        let key = Self::make_key(query);
        let raw = match self.store.get(&key).await {
            Ok(value) => value?,
            Err(e) => {
                warn!(error = %e, "cache read failed, continuing without cache");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(error = %e, "cache entry unreadable, treating as miss");
                None
            }
        }
    }

    /// Store a response under the query's fingerprint. Store failures are
    /// logged and swallowed.
    pub async fn set(&self, query: &str, data: &CachedResponse) {
        let key = Self::make_key(query);
        let payload = match serde_json::to_string(data) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cache serialization failed, skipping write");
                return;
            }
        };

        if let Err(e) = self.store.set(&key, payload, self.ttl).await {
            warn!(error = %e, "cache write failed, continuing without cache");
        }
    }
}
