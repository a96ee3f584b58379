//! # HTTP API
//!
//! Axum glue for the moderation service: route table, handlers, middleware
//! and response envelopes. Business behavior lives in the pipeline and
//! service modules; this layer extracts transport facts, enforces the admin
//! guard, and maps rejections to status codes.

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

pub use handlers::AppState;
pub use responses::ApiError;
pub use routes::create_router;
