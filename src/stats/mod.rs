//! # Statistics
//!
//! Three cooperating pieces:
//!
//! - [`tracker`] — synchronous hot-path counter updates in the distributed
//!   store; failures never touch the request
//! - [`aggregator`] — periodic Redis → relational rollups with race-free
//!   startup and idempotent upserts
//! - [`query`] — summary / time-series / per-caller reads, rollups first,
//!   live counters only for the not-yet-aggregated current window
//!
//! Counter keys live in [`keys`]; rollup rows and their upserts in
//! [`rollups`].

use thiserror::Error;

pub mod aggregator;
pub mod keys;
pub mod query;
pub mod rollups;
pub mod tracker;

/// Statistics error types
#[derive(Debug, Error)]
pub enum StatsError {
    /// Distributed store failure
    #[error("stats store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Relational store failure
    #[error("stats database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An aggregation run was already in flight
    #[error("aggregation already in progress")]
    InProgress,
}

/// Statistics result alias
pub type Result<T> = std::result::Result<T, StatsError>;

/// Which typed API surface served the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    /// Text moderation
    Text,
    /// Image moderation
    Image,
}

impl ApiKind {
    /// Wire/key string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    /// Both kinds, in a fixed order.
    pub fn all() -> [ApiKind; 2] {
        [Self::Text, Self::Image]
    }
}
