//! API key authentication
//!
//! The credential is an opaque per-deployment key presented in the
//! `X-API-Key` header by server-side callers only — it is never exposed to
//! a browser client. Missing and invalid keys are distinct failures (401 vs
//! 403).

use axum::http::HeaderMap;
use std::collections::HashSet;

use crate::error::{GatewayError, Result};

/// Header carrying the client credential
pub const API_KEY_HEADER: &str = "x-api-key";

/// API key validator
pub struct ApiKeyAuth {
    keys: HashSet<String>,
}

impl ApiKeyAuth {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Validate a presented key against the configured set.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.keys.contains(key) {
            Ok(())
        } else {
            Err(GatewayError::InvalidApiKey)
        }
    }

    /// Extract and validate the key from request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<()> {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingApiKey)?;

        self.validate(key)
    }
}
