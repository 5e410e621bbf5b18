//! Error types for the gateway
//!
//! Every failure a request can hit is classified here, together with its
//! HTTP mapping. Client-visible payloads carry a machine-readable code and a
//! generic human-readable message; backend error text, connection strings and
//! stack detail stay in the logs.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Which admission counter rejected the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    /// Per-IP daily budget
    IpDaily,
    /// Global daily budget
    GlobalDaily,
    /// Per-IP per-minute window
    Minute,
}

impl QuotaScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpDaily => "ip_daily",
            Self::GlobalDaily => "global_daily",
            Self::Minute => "minute",
        }
    }
}

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No credential presented
    #[error("missing API key")]
    MissingApiKey,

    /// Credential presented but not recognized
    #[error("invalid API key")]
    InvalidApiKey,

    /// An admission counter crossed its threshold
    #[error("{scope:?} quota exceeded: {count}/{limit}")]
    QuotaExceeded {
        scope: QuotaScope,
        count: i64,
        limit: i64,
        retry_after_seconds: u64,
    },

    /// Query exceeds the character or estimated-token ceiling
    #[error("query too large: {chars} chars / ~{estimated_tokens} tokens")]
    QueryTooLarge {
        chars: usize,
        estimated_tokens: usize,
    },

    /// Query empty or below the minimum length after normalization
    #[error("query too short after sanitization")]
    InvalidQuery,

    /// Vector search backend failed after exhausting retries
    #[error("search backend error: {0}")]
    Search(String),

    /// LLM backend call failed, possibly mid-stream
    #[error("LLM backend error: {0}")]
    Llm(String),

    /// Counter store or another hard dependency is unreachable
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Catch-all for failures with no better classification
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Machine-readable error code for client payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::QuotaExceeded { scope, .. } => match scope {
                QuotaScope::Minute => "rate_limited",
                _ => "daily_limit_exceeded",
            },
            Self::QueryTooLarge { .. } => "query_too_large",
            Self::InvalidQuery => "invalid_query",
            Self::Search(_) => "search_error",
            Self::Llm(_) => "llm_error",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::Internal(_) => "internal_server_error",
        }
    }

    /// Human-readable message safe to show a client
    ///
    /// Never includes backend error text or internal detail.
    pub fn client_message(&self) -> String {
        match self {
            Self::MissingApiKey => "Missing API key. Include 'X-API-Key' header.".to_string(),
            Self::InvalidApiKey => "Invalid API key.".to_string(),
            Self::QuotaExceeded { scope, limit, .. } => match scope {
                QuotaScope::IpDaily => format!(
                    "Günlük istek limitinize ulaştınız ({limit} istek/gün). \
                     Yarın tekrar deneyebilirsiniz."
                ),
                QuotaScope::GlobalDaily => {
                    "Sistem günlük kapasiteye ulaştı. Lütfen yarın tekrar deneyin.".to_string()
                }
                QuotaScope::Minute => {
                    "Çok fazla istek gönderdiniz. Lütfen bir dakika sonra tekrar deneyin."
                        .to_string()
                }
            },
            Self::QueryTooLarge { chars, .. } => format!(
                "Sorgunuz çok uzun ({chars} karakter). Lütfen daha kısa bir soru sorun."
            ),
            Self::InvalidQuery => "Sorgunuz çok kısa. Lütfen bir soru yazın.".to_string(),
            Self::Search(_) => {
                "Arama servisi geçici olarak erişilemiyor. Lütfen tekrar deneyin.".to_string()
            }
            Self::Llm(_) => {
                "Yanıt servisi geçici olarak erişilemiyor. Lütfen tekrar deneyin.".to_string()
            }
            Self::DependencyUnavailable(_) => {
                "Servis geçici olarak erişilemiyor. Lütfen tekrar deneyin.".to_string()
            }
            Self::Internal(_) => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
        }
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingApiKey => StatusCode::UNAUTHORIZED,
            Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::QueryTooLarge { .. } | Self::InvalidQuery => StatusCode::BAD_REQUEST,
            Self::Search(_) | Self::Llm(_) => StatusCode::BAD_GATEWAY,
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retry-After hint in seconds, if the error carries one
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::QuotaExceeded {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

/// Standardized error payload — safe for clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable message (generic)
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// A [`GatewayError`] bound to the request it failed, for HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(error: GatewayError, request_id: impl Into<Option<String>>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();

        // Full detail stays internal
        if status.is_server_error() {
            error!(
                request_id = self.request_id.as_deref().unwrap_or("unknown"),
                error = %self.error,
                "request failed"
            );
        }

        let retry_after = self.error.retry_after();
        let body = ErrorResponse {
            error: self.error.code().to_string(),
            message: self.error.client_message(),
            request_id: self.request_id,
            retry_after_seconds: retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
