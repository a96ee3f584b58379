//! # API Handlers
//!
//! Request handlers for the moderation, credential and statistics
//! endpoints. Handlers stay thin: extract transport facts, call into the
//! pipeline or services, map rejections onto [`ApiError`].

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::ai::ProviderRegistry;
use crate::auth::{AuthError, CredentialService};
use crate::config::ServiceConfig;
use crate::pipeline::{
    AiResultCache, FilterPipeline, FilterRequestBody, PipelineReject, RequestContext,
    ResponseCache,
};
use crate::stats::aggregator::AggregationWorker;
use crate::stats::query::{StatsQueryService, SummaryRange};

use super::middleware::{extract_api_key, require_admin, ClientIp};
use super::responses::{
    with_filter_headers, ApiError, CredentialResponse, ValidationResponse,
};

/// Maximum items accepted by the batch endpoint.
pub const MAX_BATCH_ITEMS: usize = 32;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration
    pub config: Arc<ServiceConfig>,
    /// The filter pipeline
    pub pipeline: Arc<FilterPipeline>,
    /// Credential service
    pub credentials: Arc<CredentialService>,
    /// Statistics read side
    pub query: Arc<StatsQueryService>,
    /// Aggregation worker
    pub aggregator: Arc<AggregationWorker>,
    /// Provider registry (for the AI monitor)
    pub registry: Arc<ProviderRegistry>,
    /// Response cache (for cache statistics)
    pub response_cache: Arc<ResponseCache>,
    /// AI-result cache (for cache statistics)
    pub result_cache: Arc<AiResultCache>,
}

// ============================================================================
// Filter endpoints
// ============================================================================

/// Query parameters of the filter endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    /// Bypass the response cache when present
    pub nocache: Option<String>,
    /// API key alternative to the Authorization header
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

fn request_context(
    path: &str,
    ip: String,
    headers: &HeaderMap,
    query: &FilterQuery,
) -> RequestContext {
    RequestContext {
        path: path.to_string(),
        method: "POST".to_string(),
        ip,
        api_key: extract_api_key(headers, query.api_key.as_deref()),
        no_cache: query.nocache.is_some(),
    }
}

fn map_reject(reject: PipelineReject) -> ApiError {
    match reject {
        PipelineReject::RateLimited(decision) => ApiError::rate_limited(decision),
        PipelineReject::Unauthorized(message) => ApiError::unauthorized(message),
        PipelineReject::Invalid(error) => ApiError::bad_request(error.to_string()),
        PipelineReject::Internal(detail) => ApiError::internal(detail),
    }
}

/// `POST /v1/filter`
pub async fn filter(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
    Json(body): Json<FilterRequestBody>,
) -> Result<Response, ApiError> {
    let ctx = request_context("/v1/filter", ip, &headers, &query);
    let outcome = state.pipeline.execute(&ctx, body).await.map_err(map_reject)?;

    Ok(with_filter_headers(
        Json(outcome.result).into_response(),
        outcome.rate_limit,
        outcome.latency_ms,
    ))
}

/// `POST /v1/filter/text`
pub async fn filter_text(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
    Json(mut body): Json<FilterRequestBody>,
) -> Result<Response, ApiError> {
    body.image = None;
    let ctx = request_context("/v1/filter/text", ip, &headers, &query);
    let outcome = state.pipeline.execute(&ctx, body).await.map_err(map_reject)?;

    Ok(with_filter_headers(
        Json(outcome.result).into_response(),
        outcome.rate_limit,
        outcome.latency_ms,
    ))
}

/// `POST /v1/filter/image`
pub async fn filter_image(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
    Json(mut body): Json<FilterRequestBody>,
) -> Result<Response, ApiError> {
    body.text = None;
    let ctx = request_context("/v1/filter/image", ip, &headers, &query);
    let outcome = state.pipeline.execute(&ctx, body).await.map_err(map_reject)?;

    Ok(with_filter_headers(
        Json(outcome.result).into_response(),
        outcome.rate_limit,
        outcome.latency_ms,
    ))
}

/// Body of the batch endpoint.
#[derive(Debug, Deserialize)]
pub struct BatchBody {
    /// Requests to process, answered in the same order
    pub items: Vec<FilterRequestBody>,
}

/// `POST /v1/filter/batch`
pub async fn filter_batch(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
    Json(body): Json<BatchBody>,
) -> Result<Response, ApiError> {
    if body.items.is_empty() {
        return Err(ApiError::bad_request("batch must contain at least one item"));
    }
    if body.items.len() > MAX_BATCH_ITEMS {
        return Err(ApiError::bad_request(format!(
            "batch exceeds {} items",
            MAX_BATCH_ITEMS
        )));
    }

    let ctx = request_context("/v1/filter/batch", ip, &headers, &query);

    let mut results = Vec::with_capacity(body.items.len());
    for item in body.items {
        let outcome = state.pipeline.execute(&ctx, item).await.map_err(map_reject)?;
        results.push(outcome.result);
    }

    Ok(Json(results).into_response())
}

// ============================================================================
// Credential endpoints
// ============================================================================

/// `GET /v1/apikey`
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> Result<Json<CredentialResponse>, ApiError> {
    let credential = state
        .credentials
        .get_or_create(&ip)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(CredentialResponse {
        key: credential.key,
        user_id: credential.user_id,
        created_at: credential.created_at,
    }))
}

/// Body of the revoke endpoint.
#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    /// Key to revoke
    pub key: String,
}

/// `POST /v1/apikey/revoke`
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Json(body): Json<RevokeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let revoked = state
        .credentials
        .revoke(&body.key)
        .await
        .map_err(ApiError::internal)?;

    if revoked {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ApiError::not_found("unknown API key"))
    }
}

/// `GET /v1/apikey/validate`
pub async fn validate_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Result<Json<ValidationResponse>, ApiError> {
    let key = extract_api_key(&headers, query.api_key.as_deref())
        .ok_or_else(|| ApiError::unauthorized("missing API key"))?;

    match state.credentials.validate(&key).await {
        Ok(credential) => Ok(Json(ValidationResponse {
            valid: true,
            user_id: credential.user_id,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
        })),
        Err(AuthError::NotFound) => Err(ApiError::unauthorized("unknown API key")),
        Err(AuthError::Revoked) => Err(ApiError::unauthorized("API key revoked")),
        Err(AuthError::Database(e)) => Err(ApiError::internal(e)),
    }
}

// ============================================================================
// Statistics endpoints
// ============================================================================

/// Query parameters of the summary endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// `today`, `yesterday`, `7d`, `30d` or `all`
    pub range: Option<String>,
}

/// `GET /stats/summary`
pub async fn stats_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Response, ApiError> {
    let range = match query.range.as_deref() {
        None => SummaryRange::All,
        Some(name) => SummaryRange::parse(name)
            .ok_or_else(|| ApiError::bad_request(format!("unknown range: {}", name)))?,
    };

    let report = state.query.summary(range).await.map_err(ApiError::internal)?;
    Ok(Json(report).into_response())
}

/// Query parameters of the performance endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct PerformanceQuery {
    /// Hours of history (default 24)
    pub hours: Option<i64>,
}

/// `GET /stats/performance`
pub async fn stats_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Response, ApiError> {
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 30);
    let to = Utc::now();
    let from = to - ChronoDuration::hours(hours);

    let rows = state
        .query
        .hourly_series(from, to)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(rows).into_response())
}

/// `GET /stats/ai-monitor`
pub async fn stats_ai_monitor(State(state): State<AppState>) -> Result<Response, ApiError> {
    let apis = state
        .query
        .api_live_stats()
        .await
        .map_err(ApiError::internal)?;

    let models: Vec<serde_json::Value> = state
        .registry
        .model_table()
        .into_iter()
        .map(|(tier, model)| json!({ "tier": tier.as_str(), "model": model }))
        .collect();

    Ok(Json(json!({ "models": models, "apis": apis })).into_response())
}

/// Query parameters of the historical endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoricalQuery {
    /// Start date, inclusive (default 7 days ago)
    pub from: Option<NaiveDate>,
    /// End date, inclusive (default today)
    pub to: Option<NaiveDate>,
    /// `daily` (default) or `hourly`
    pub granularity: Option<String>,
}

/// `GET /stats/historical`
pub async fn stats_historical(
    State(state): State<AppState>,
    Query(query): Query<HistoricalQuery>,
) -> Result<Response, ApiError> {
    let today = Utc::now().date_naive();
    let from = query.from.unwrap_or(today - ChronoDuration::days(6));
    let to = query.to.unwrap_or(today);
    if from > to {
        return Err(ApiError::bad_request("from must not be after to"));
    }

    match query.granularity.as_deref().unwrap_or("daily") {
        "daily" => {
            let rows = state
                .query
                .daily_series(from, to)
                .await
                .map_err(ApiError::internal)?;
            Ok(Json(rows).into_response())
        }
        "hourly" => {
            let from = Utc
                .from_utc_datetime(&from.and_hms_opt(0, 0, 0).expect("midnight"));
            let to = Utc
                .from_utc_datetime(&to.and_hms_opt(23, 59, 59).expect("end of day"));
            let rows = state
                .query
                .hourly_series(from, to)
                .await
                .map_err(ApiError::internal)?;
            Ok(Json(rows).into_response())
        }
        other => Err(ApiError::bad_request(format!(
            "unknown granularity: {}",
            other
        ))),
    }
}

/// `GET /stats/combined`
pub async fn stats_combined(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summary = state
        .query
        .summary(SummaryRange::All)
        .await
        .map_err(ApiError::internal)?;
    let today = state
        .query
        .summary(SummaryRange::Today)
        .await
        .map_err(ApiError::internal)?;
    let apis = state
        .query
        .api_live_stats()
        .await
        .map_err(ApiError::internal)?;
    let flags = {
        let day = Utc::now().date_naive();
        state
            .query
            .flags_series(day - ChronoDuration::days(6), day)
            .await
            .map_err(ApiError::internal)?
    };

    Ok(Json(json!({
        "allTime": summary,
        "today": today,
        "apis": apis,
        "flags": flags,
    }))
    .into_response())
}

/// Query parameters of the per-caller endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct UserStatsQuery {
    /// Start date, inclusive (default 30 days ago)
    pub from: Option<NaiveDate>,
    /// End date, inclusive (default today)
    pub to: Option<NaiveDate>,
}

/// `GET /stats/user/:id`
pub async fn stats_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<UserStatsQuery>,
) -> Result<Response, ApiError> {
    let today = Utc::now().date_naive();
    let from = query.from.unwrap_or(today - ChronoDuration::days(29));
    let to = query.to.unwrap_or(today);

    let rows = state
        .query
        .user_history(&user_id, from, to)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(rows).into_response())
}

/// `GET /stats/cache`
pub async fn stats_cache(State(state): State<AppState>) -> Response {
    Json(json!({
        "responseCache": state.response_cache.stats(),
        "aiResultCache": state.result_cache.stats(),
        "credentialCache": state.credentials.local_cache_stats(),
    }))
    .into_response()
}

/// Body of the aggregation trigger.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregateBody {
    /// Reset counters after a fully successful run
    pub clear_redis_keys: bool,
}

/// `POST /stats/aggregate`
///
/// Kicks off an aggregation run in the background and returns 202
/// immediately; progress lands in the log.
pub async fn stats_aggregate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<AggregateBody>>,
) -> Result<Response, ApiError> {
    require_admin(&headers, &state.config.admin_token)?;

    let clear = body.map(|Json(b)| b.clear_redis_keys).unwrap_or(false);
    let aggregator = Arc::clone(&state.aggregator);

    tokio::spawn(async move {
        match aggregator.run(clear).await {
            Ok(report) if report.success => {
                log::info!("manual aggregation finished (cleared: {})", report.cleared);
            }
            Ok(report) => {
                log::warn!("manual aggregation finished with errors: {:?}", report.errors);
            }
            Err(e) => log::warn!("manual aggregation rejected: {}", e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "status": "processing" })),
    )
        .into_response())
}

// ============================================================================
// Health
// ============================================================================

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.query.health().await;

    let status = if report.healthy() { "healthy" } else { "degraded" };
    let body = json!({
        "status": status,
        "services": {
            "api": "healthy",
            "redis": if report.redis { "healthy" } else { "unreachable" },
            "database": if report.database { "healthy" } else { "unreachable" },
        }
    });

    let code = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(body)).into_response()
}
