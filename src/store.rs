//! Shared counter and key-value stores
//!
//! The admission counters and the response cache are the only mutable state
//! shared across requests. Both are reached through narrow async traits whose
//! surface is a Redis-class command subset (`INCR`/`EXPIRE`/`GET`,
//! `SET` with TTL) — single-key, atomic, no multi-key transactions. The
//! in-process [`MemoryStore`] is the default implementation; an external
//! store drops in at the trait without touching callers.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Store-level failure — callers decide whether to fail open or closed
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic integer counters with per-key expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a counter, creating it at 1 if absent.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Attach an expiry to an existing counter. No-op for absent keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read a counter without modifying it.
    async fn get_count(&self, key: &str) -> Result<Option<i64>, StoreError>;
}

/// String values with per-key TTL
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}

struct CounterEntry {
    count: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Instant::now() >= at)
    }
}

struct ValueEntry {
    value: String,
    expires_at: Instant,
}

impl ValueEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process store backed by concurrent maps
///
/// Expired entries are dropped lazily on the next access. Increments are
/// atomic under the map's entry-level locking, so concurrent bumps of the
/// same key never lose counts.
#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<String, CounterEntry>,
    values: DashMap<String, ValueEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: None,
            });
        if entry.is_expired() {
            entry.count = 0;
            entry.expires_at = None;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn get_count(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.counters.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.count)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // The read guard must be released before removing the key
        let expired = match self.values.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
