//! # API Response Types
//!
//! Error and success envelopes for the REST surface. Errors serialize to a
//! small JSON object with a stable machine-readable code; rate-limit
//! rejections additionally carry the standard `Retry-After` and
//! `X-RateLimit-*` headers.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::ratelimit::RateLimitDecision;

/// Header carrying the request handling time in milliseconds.
pub const PROCESSING_TIME_HEADER: &str = "X-Processing-Time";

/// Standard rate limit headers.
pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

/// An HTTP-facing error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    rate_limit: Option<RateLimitDecision>,
}

impl ApiError {
    /// 400 with a validation message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation_error",
            message: message.into(),
            rate_limit: None,
        }
    }

    /// 401 with an auth message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "auth_error",
            message: message.into(),
            rate_limit: None,
        }
    }

    /// 404 for a missing resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            rate_limit: None,
        }
    }

    /// 429 carrying the window state for the response headers.
    pub fn rate_limited(decision: RateLimitDecision) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "rate_limited",
            message: "rate limit exceeded".to_string(),
            rate_limit: Some(decision),
        }
    }

    /// 500 with a generic message; detail goes to the log, not the wire.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        log::error!("internal error: {}", detail);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: "internal server error".to_string(),
            rate_limit: None,
        }
    }

    /// 503 for a degraded dependency.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "service_unavailable",
            message: message.into(),
            rate_limit: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "code": self.code,
        });

        let mut response = (self.status, Json(body)).into_response();

        if let Some(decision) = self.rate_limit {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
                headers.insert(RATE_LIMIT_LIMIT, value);
            }
            if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
                headers.insert(RATE_LIMIT_REMAINING, value);
            }
            if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Attach rate-limit and processing-time headers to a success response.
pub fn with_filter_headers(
    mut response: Response,
    rate_limit: Option<RateLimitDecision>,
    latency_ms: u64,
) -> Response {
    let headers = response.headers_mut();

    if let Some(decision) = rate_limit {
        if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
            headers.insert(RATE_LIMIT_LIMIT, value);
        }
        if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
            headers.insert(RATE_LIMIT_REMAINING, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&latency_ms.to_string()) {
        headers.insert(PROCESSING_TIME_HEADER, value);
    }

    response
}

/// Wire shape of a credential.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    /// The API key
    pub key: String,
    /// Caller id derived from the IP
    pub user_id: String,
    /// Issue time
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Wire shape of a validation check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    /// Whether the key is valid and active
    pub valid: bool,
    /// Caller id
    pub user_id: String,
    /// Issue time
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last validation time
    pub last_used_at: chrono::DateTime<chrono::Utc>,
}
