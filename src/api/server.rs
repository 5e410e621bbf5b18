//! API server assembly
//!
//! Builds every service once at startup — shared store, cache, backend
//! clients, limiters — and hands them to request handlers through shared
//! state. No ambient globals; the construction order here is the dependency
//! graph.

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use super::middleware::{
    auth_middleware, request_id_middleware, security_headers_middleware, AuthState,
};
use super::routes::{self, AppState};
use crate::admission::{BudgetLimiter, RateLimiter};
use crate::cache::ResponseCache;
use crate::chat::ChatService;
use crate::config::Settings;
use crate::llm::{LlmConfig, LlmService};
use crate::search::{SearchConfig, SearchService};
use crate::store::MemoryStore;

/// Reject request bodies above this size — more than enough for a chat query
const MAX_BODY_BYTES: usize = 10_240;

/// API server
pub struct ApiServer {
    settings: Settings,
}

impl ApiServer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Build the application router with all services wired up.
    pub fn build(&self) -> Result<Router> {
        let settings = &self.settings;

        // One shared store backs both the admission counters and the cache
        let store = Arc::new(MemoryStore::new());

        let search = Arc::new(SearchService::new(SearchConfig {
            base_url: settings.search_backend_url.clone(),
            api_key: settings.search_api_key.clone(),
            embed_model: settings.embed_model.clone(),
        })?);
        let llm = Arc::new(LlmService::new(LlmConfig {
            base_url: settings.llm_backend_url.clone(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
        })?);
        let cache = Arc::new(ResponseCache::new(store.clone(), settings.cache_ttl));

        let state = Arc::new(AppState {
            chat: Arc::new(ChatService::new(search, llm, cache)),
            budget: Arc::new(BudgetLimiter::new(
                store.clone(),
                settings.ip_daily_limit,
                settings.global_daily_limit,
            )),
            rate: Arc::new(RateLimiter::new(store, settings.rate_limit_per_minute)),
            started_at: Instant::now(),
        });

        let auth_state = AuthState::new(settings.api_keys.iter().cloned());

        let origins: Vec<HeaderValue> = settings
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                header::CONTENT_TYPE,
                header::HeaderName::from_static("x-api-key"),
            ])
            .max_age(Duration::from_secs(600));

        let protected = Router::new()
            .route("/api/v1/chat", post(routes::chat))
            .route("/api/v1/chat/stream", post(routes::chat_stream))
            .route("/api/v1/usage", get(routes::usage))
            .route_layer(from_fn_with_state(auth_state, auth_middleware));

        let app = Router::new()
            .route("/api/v1/health", get(routes::health))
            .merge(protected)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(cors)
            .layer(from_fn(security_headers_middleware))
            .layer(from_fn(request_id_middleware))
            .with_state(state);

        Ok(app)
    }

    /// Bind to the configured address and serve until shutdown.
    pub async fn start(self) -> Result<()> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("gateway listening on {addr}");
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener (used by tests to grab a free
    /// port before starting).
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let app = self.build()?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}
