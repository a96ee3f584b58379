//! # API Middleware
//!
//! Cross-cutting request plumbing:
//!
//! - request-id generation/passthrough (`X-Request-ID`)
//! - security headers on every response
//! - client IP resolution (first `X-Forwarded-For` hop, else peer address)
//! - CORS layer construction from configuration
//! - admin-token guard for privileged statistics operations

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use super::responses::ApiError;

/// Request ID header name.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Admin token header name.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Client IP resolved for the current request, stored in extensions.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Tag every request with an id and echo it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Conservative security headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

/// Resolve the client IP and stash it in request extensions.
///
/// The first `X-Forwarded-For` hop wins when present (the service is meant
/// to sit behind a trusted proxy); otherwise the socket peer address.
pub async fn client_ip_middleware(mut request: Request<Body>, next: Next) -> Response {
    let ip = resolve_client_ip(&request);
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

fn resolve_client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract the presented API key: `Authorization: Bearer …` first, then the
/// `apiKey` query parameter.
pub fn extract_api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    query
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
}

/// Reject privileged operations without the configured admin token.
pub fn require_admin(headers: &HeaderMap, admin_token: &str) -> Result<(), ApiError> {
    if admin_token.is_empty() {
        return Err(ApiError::unauthorized("admin operations are disabled"));
    }

    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented == admin_token {
        Ok(())
    } else {
        Err(ApiError::unauthorized("invalid admin token"))
    }
}

/// Build the CORS layer from the configured origin list. `*` allows any
/// origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(parsed)
}

// ============================================================================
// Tests
// ============================================================================
