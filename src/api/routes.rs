//! API routes for the gateway
//!
//! The chat handlers run the full admission chain in order — rate window,
//! daily budgets, size limits, injection guard — before a query reaches the
//! pipeline. Injection detection is a policy short-circuit, not an error:
//! the client receives the fixed refusal with a 200.

use axum::{
    extract::{ConnectInfo, State},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::{pin_mut, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::middleware::RequestId;
use crate::admission::{BudgetLimiter, RateLimiter, UsageStats};
use crate::chat::{ChatService, REFUSAL_MESSAGE};
use crate::error::{ApiError, GatewayError};
use crate::guard;

/// Application state shared by all handlers
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub budget: Arc<BudgetLimiter>,
    pub rate: Arc<RateLimiter>,
    pub started_at: Instant,
}

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

/// Chat response body
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<String>,
    pub cached: bool,
}

impl ChatResponse {
    /// The fixed refusal payload for blocked queries.
    fn refusal() -> Self {
        Self {
            response: REFUSAL_MESSAGE.to_string(),
            sources: Vec::new(),
            cached: false,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
}

/// Run the admission chain and return the normalized query.
///
/// Order matters: cheap counters first, then input shape. Every check
/// counts this request against its bucket before comparing.
async fn admit(state: &AppState, ip: &str, raw_query: &str) -> Result<String, GatewayError> {
    state.rate.check(ip).await?;
    state.budget.check_ip_daily(ip).await?;
    state.budget.check_global_daily().await?;

    let query = guard::normalize_query(raw_query)?;
    guard::validate_query_size(&query)?;
    Ok(query)
}

/// POST /api/v1/chat — answer a query in one response.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let ip = addr.ip().to_string();
    let fail = |e: GatewayError| ApiError::new(e, Some(request_id.0.clone()));

    let query = admit(&state, &ip, &body.query).await.map_err(fail)?;

    if guard::detect_prompt_injection(&query) {
        warn!(ip = %ip, "prompt injection blocked");
        return Ok(Json(ChatResponse::refusal()));
    }

    let outcome = state.chat.respond(&query).await.map_err(fail)?;
    info!(ip = %ip, cached = outcome.cached, "chat response sent");

    Ok(Json(ChatResponse {
        response: outcome.response,
        sources: outcome.sources,
        cached: outcome.cached,
    }))
}

/// POST /api/v1/chat/stream — answer a query as server-sent events.
///
/// Text frames as fragments arrive, then a `[DONE]` sentinel frame. A
/// mid-stream failure emits an `[ERROR]` frame (error code only, no
/// internal detail) followed by the sentinel.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let ip = addr.ip().to_string();
    let fail = |e: GatewayError| ApiError::new(e, Some(request_id.0.clone()));

    let query = admit(&state, &ip, &body.query).await.map_err(fail)?;

    if guard::detect_prompt_injection(&query) {
        warn!(ip = %ip, "prompt injection blocked");
        return Ok(Json(ChatResponse::refusal()).into_response());
    }

    let fragments = state.chat.respond_stream(query);
    let events = async_stream::stream! {
        pin_mut!(fragments);
        while let Some(item) = fragments.next().await {
            match item {
                Ok(token) => {
                    // SSE fields reject carriage returns
                    yield Ok::<Event, Infallible>(Event::default().data(token.replace('\r', "")));
                }
                Err(e) => {
                    tracing::error!(error = %e, "stream failed mid-flight");
                    yield Ok(Event::default().data(format!(
                        "[ERROR] Bir hata oluştu: {}",
                        e.code()
                    )));
                    break;
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// GET /api/v1/health — public liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (state.started_at.elapsed().as_secs_f64() * 10.0).round() / 10.0,
    })
}

/// GET /api/v1/usage — current admission counters, for monitoring.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<UsageStats>, ApiError> {
    let stats = state
        .budget
        .usage()
        .await
        .map_err(|e| ApiError::new(e, Some(request_id.0)))?;
    Ok(Json(stats))
}
