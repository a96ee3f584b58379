//! End-to-end tests of the HTTP surface: moderation verdicts, credential
//! lifecycle, rate limiting and response headers, driven through the full
//! router with an in-process counter store and an in-memory database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use palisade::ai::{AiVerdict, AnalysisProvider, ProviderRegistry};
use palisade::api::{create_router, AppState};
use palisade::auth::CredentialService;
use palisade::cache::{CacheConfig, MemoryCache};
use palisade::config::ServiceConfig;
use palisade::db::Database;
use palisade::pipeline::{AiResultCache, FilterConfig, FilterPipeline, Flag, ResponseCache};
use palisade::ratelimit::{FixedWindowLimiter, RateLimitSettings};
use palisade::stats::aggregator::AggregationWorker;
use palisade::stats::query::StatsQueryService;
use palisade::stats::tracker::RequestTracker;
use palisade::store::{CounterStore, MemoryCounterStore};

/// Provider returning a fixed verdict and counting invocations.
struct ScriptedProvider {
    verdict: AiVerdict,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn blocking(flags: Vec<Flag>) -> Arc<Self> {
        Arc::new(Self {
            verdict: AiVerdict {
                is_violation: true,
                flags,
                reason: "confirmed by model".to_string(),
                filtered_content: None,
            },
            calls: AtomicUsize::new(0),
        })
    }

    fn allowing() -> Arc<Self> {
        Arc::new(Self {
            verdict: AiVerdict {
                is_violation: false,
                flags: Vec::new(),
                reason: String::new(),
                filtered_content: None,
            },
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    async fn analyze(
        &self,
        _text: &str,
        _history: &[String],
        _config: &FilterConfig,
    ) -> palisade::ai::Result<AiVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct TestApp {
    router: Router,
    provider: Arc<ScriptedProvider>,
    api_key: String,
}

async fn test_app(provider: Arc<ScriptedProvider>, rate_limit: u64) -> TestApp {
    let mut config = ServiceConfig::from_env().unwrap();
    config.admin_token = "test-admin".to_string();
    config.rate_limit = RateLimitSettings {
        limit: rate_limit,
        window: Duration::from_secs(60),
    };
    let config = Arc::new(config);

    let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let db = Database::connect_in_memory().await.unwrap();

    let response_cache = Arc::new(ResponseCache::new(
        CacheConfig::default(),
        Duration::from_secs(60),
    ));
    let result_cache = Arc::new(AiResultCache::new(CacheConfig::default()));
    let registry = Arc::new(ProviderRegistry::new(
        provider.clone(),
        provider.clone(),
        provider.clone(),
    ));

    let credentials = Arc::new(CredentialService::new(
        db.clone(),
        Arc::clone(&store),
        MemoryCache::new(CacheConfig::default()),
    ));
    let limiter = Arc::new(FixedWindowLimiter::new(
        Arc::clone(&store),
        config.rate_limit,
    ));
    let tracker = Arc::new(RequestTracker::new(Arc::clone(&store), 500));
    let aggregator = Arc::new(AggregationWorker::new(Arc::clone(&store), db.clone(), 500));
    let query = Arc::new(StatsQueryService::new(db.clone(), Arc::clone(&store)));

    let pipeline = Arc::new(FilterPipeline::new(
        Arc::clone(&registry),
        Arc::clone(&credentials),
        limiter,
        tracker,
        Arc::clone(&response_cache),
        Arc::clone(&result_cache),
    ));

    let api_key = credentials.get_or_create("198.51.100.7").await.unwrap().key;

    let state = AppState {
        config,
        pipeline,
        credentials,
        query,
        aggregator,
        registry,
        response_cache,
        result_cache,
    };

    TestApp {
        router: create_router(state),
        provider,
        api_key,
    }
}

fn filter_request(app: &TestApp, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/filter")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.api_key))
        .header("X-Forwarded-For", "198.51.100.7")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_clean_text_passes_without_ai() {
    let app = test_app(ScriptedProvider::blocking(vec![Flag::Abuse]), 100).await;

    let response = app
        .router
        .clone()
        .oneshot(filter_request(&app, json!({ "text": "Hi there", "config": {} })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-Processing-Time"));

    let body = json_body(response).await;
    assert_eq!(body["blocked"], json!(false));
    assert_eq!(body["flags"], json!([]));
    assert_eq!(body["reason"], json!("Content passed all moderation checks"));
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_phone_number_blocked() {
    let app = test_app(ScriptedProvider::blocking(vec![Flag::PhoneNumber]), 100).await;

    let response = app
        .router
        .clone()
        .oneshot(filter_request(
            &app,
            json!({ "text": "Call me at 555-123-4567", "config": {} }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["blocked"], json!(true));

    let flags: Vec<String> = body["flags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f.as_str().unwrap().to_string())
        .collect();
    assert!(flags.iter().any(|f| f == "phone_number" || f == "phone"));

    let reason = body["reason"].as_str().unwrap();
    assert!(!reason.chars().any(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_allow_phone_config_passes() {
    let app = test_app(ScriptedProvider::blocking(vec![Flag::PhoneNumber]), 100).await;

    let response = app
        .router
        .clone()
        .oneshot(filter_request(
            &app,
            json!({ "text": "Call me at 555-123-4567", "config": { "allowPhone": true } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["blocked"], json!(false));
    assert_eq!(body["flags"], json!([]));
    assert_eq!(app.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_filtered_content_masks_match() {
    let app = test_app(ScriptedProvider::blocking(vec![Flag::PhoneNumber]), 100).await;

    let response = app
        .router
        .clone()
        .oneshot(filter_request(
            &app,
            json!({
                "text": "Call me at 555-123-4567",
                "config": { "returnFilteredMessage": true }
            }),
        ))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["blocked"], json!(true));
    assert_eq!(body["filteredContent"], json!("Call me at ************"));
}

#[tokio::test]
async fn test_rate_limit_rejects_over_window() {
    let app = test_app(ScriptedProvider::allowing(), 3).await;

    for i in 0..3 {
        let response = app
            .router
            .clone()
            .oneshot(filter_request(
                &app,
                json!({ "text": format!("message number {} here", i) }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i);
    }

    let response = app
        .router
        .clone()
        .oneshot(filter_request(&app, json!({ "text": "one more message now" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "0"
    );
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_missing_credential_unauthorized() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/filter")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "198.51.100.7")
        .body(Body::from(json!({ "text": "hello there" }).to_string()))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_key_via_query_parameter() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/filter?apiKey={}", app.api_key))
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "198.51.100.7")
        .body(Body::from(
            json!({ "text": "hello there my friend" }).to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_body_is_400() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let response = app
        .router
        .clone()
        .oneshot(filter_request(&app, json!({ "config": {} })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_preserves_order() {
    let app = test_app(ScriptedProvider::blocking(vec![Flag::PhoneNumber]), 100).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/filter/batch")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.api_key))
        .header("X-Forwarded-For", "198.51.100.7")
        .body(Body::from(
            json!({
                "items": [
                    { "text": "a perfectly normal sentence" },
                    { "text": "Call me at 555-123-4567" }
                ]
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["blocked"], json!(false));
    assert_eq!(items[1]["blocked"], json!(true));
}

#[tokio::test]
async fn test_credential_lifecycle() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    // Issue for a fresh IP.
    let request = Request::builder()
        .method("GET")
        .uri("/v1/apikey")
        .header("X-Forwarded-For", "203.0.113.50")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let key = body["key"].as_str().unwrap().to_string();
    assert_eq!(key.len(), 64);
    assert!(body["userId"].as_str().unwrap().starts_with('u'));

    // Validate it.
    let request = Request::builder()
        .method("GET")
        .uri("/v1/apikey/validate")
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .header("X-Forwarded-For", "203.0.113.50")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["valid"], json!(true));

    // Revoke it.
    let request = Request::builder()
        .method("POST")
        .uri("/v1/apikey/revoke")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "203.0.113.50")
        .body(Body::from(json!({ "key": key }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Revoked key no longer validates.
    let request = Request::builder()
        .method("GET")
        .uri("/v1/apikey/validate")
        .header(header::AUTHORIZATION, format!("Bearer {}", key))
        .header("X-Forwarded-For", "203.0.113.50")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoke_unknown_key_404() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/apikey/revoke")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", "203.0.113.50")
        .body(Body::from(json!({ "key": "0".repeat(64) }).to_string()))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["services"]["redis"], json!("healthy"));
    assert_eq!(body["services"]["database"], json!("healthy"));
}

#[tokio::test]
async fn test_aggregate_requires_admin_token() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("POST")
        .uri("/stats/aggregate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/stats/aggregate")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Admin-Token", "test-admin")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["status"], json!("processing"));
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = test_app(ScriptedProvider::allowing(), 100).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("X-Request-ID", "trace-me-42")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("X-Request-ID").unwrap(),
        "trace-me-42"
    );
}
