//! Request middleware: authentication, request IDs, security headers

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::ApiKeyAuth;
use crate::error::ApiError;

/// Header carrying the correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Authentication state shared across requests
#[derive(Clone)]
pub struct AuthState {
    pub auth: Arc<ApiKeyAuth>,
}

impl AuthState {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            auth: Arc::new(ApiKeyAuth::new(keys)),
        }
    }
}

/// Correlation ID assigned to every request
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Validate the `X-API-Key` header on protected routes.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone());

    state
        .auth
        .authenticate(request.headers())
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(next.run(request).await)
}

/// Assign a correlation ID: honor an inbound `X-Request-ID` (e.g. from a
/// load balancer) or mint one, store it in extensions for handlers, and echo
/// it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Add standard security headers to every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}
