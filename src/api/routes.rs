//! # API Routes
//!
//! Route table for the moderation service:
//!
//! - `/v1/filter[...]` — moderation endpoints
//! - `/v1/apikey[...]` — credential issuing, validation, revocation
//! - `/stats/*` — statistics reads and the aggregation trigger
//! - `/health` — dependency reachability

use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, AppState};
use super::middleware::{
    client_ip_middleware, cors_layer, request_id_middleware, security_headers_middleware,
};

/// Build the complete router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .nest("/v1", v1_routes())
        .nest("/stats", stats_routes())
        .route("/health", get(handlers::health))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(client_ip_middleware))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Moderation and credential routes.
fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/filter", post(handlers::filter))
        .route("/filter/batch", post(handlers::filter_batch))
        .route("/filter/text", post(handlers::filter_text))
        .route("/filter/image", post(handlers::filter_image))
        .route("/apikey", get(handlers::create_api_key))
        .route("/apikey/revoke", post(handlers::revoke_api_key))
        .route("/apikey/validate", get(handlers::validate_api_key))
}

/// Statistics routes.
fn stats_routes() -> Router<AppState> {
    Router::new()
        .route("/summary", get(handlers::stats_summary))
        .route("/performance", get(handlers::stats_performance))
        .route("/ai-monitor", get(handlers::stats_ai_monitor))
        .route("/historical", get(handlers::stats_historical))
        .route("/combined", get(handlers::stats_combined))
        .route("/user/:id", get(handlers::stats_user))
        .route("/cache", get(handlers::stats_cache))
        .route("/aggregate", post(handlers::stats_aggregate))
}
