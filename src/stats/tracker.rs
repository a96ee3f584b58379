//! Hot-path request statistics
//!
//! Counter writes run synchronously after the verdict is composed and
//! before the handler returns, so an aggregation that starts immediately
//! afterwards observes the request. Writes are best-effort: a store failure
//! is logged and swallowed, never surfaced to the caller. Ordering across
//! keys is not atomic and does not need to be.

use std::sync::Arc;

use crate::pipeline::request::Flag;
use crate::store::CounterStore;

use super::{keys, ApiKind};

/// What one finished request contributes to the counters.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Caller id from the validated credential
    pub caller_id: String,
    /// Whether the verdict blocked the content
    pub blocked: bool,
    /// Whether the response came from the response cache
    pub cached: bool,
    /// Flags on the verdict
    pub flags: Vec<Flag>,
    /// Wall-clock handling time
    pub latency_ms: u64,
    /// Which typed surface served the request
    pub api: ApiKind,
    /// Whether the AI stage failed
    pub api_error: bool,
}

/// Hot-path tracker over the distributed counter store.
pub struct RequestTracker {
    store: Arc<dyn CounterStore>,
    latency_retention: usize,
}

impl RequestTracker {
    /// Build a tracker. `latency_retention` is the sample count the
    /// aggregator keeps; the tracker trims to twice that.
    pub fn new(store: Arc<dyn CounterStore>, latency_retention: usize) -> Self {
        Self {
            store,
            latency_retention: latency_retention.max(1),
        }
    }

    /// Record one finished request. Never fails.
    pub async fn record(&self, outcome: &RequestOutcome) {
        self.incr(keys::REQUESTS_TOTAL).await;

        if outcome.blocked {
            self.incr(keys::REQUESTS_BLOCKED).await;
        }
        if outcome.cached {
            self.incr(keys::REQUESTS_CACHED).await;
        }

        self.incr(&keys::user_key(&outcome.caller_id)).await;

        for flag in &outcome.flags {
            self.incr(&keys::flag_key(*flag)).await;
        }

        let latency = outcome.latency_ms.to_string();
        if let Err(e) = self.store.lpush(keys::LATENCY_ALL, &latency).await {
            log::warn!("latency sample push failed: {}", e);
        } else {
            let keep = (self.latency_retention * 2) as i64;
            if let Err(e) = self.store.ltrim(keys::LATENCY_ALL, 0, keep - 1).await {
                log::warn!("latency sample trim failed: {}", e);
            }
        }

        let api_key = keys::api_stats_key(outcome.api);
        self.hincr(&api_key, "calls", 1).await;
        self.hincr(&api_key, "errors", i64::from(outcome.api_error)).await;
        self.hincr(&api_key, "total_time", outcome.latency_ms as i64).await;
    }

    async fn incr(&self, key: &str) {
        if let Err(e) = self.store.incr_by(key, 1).await {
            log::warn!("counter increment failed for {}: {}", key, e);
        }
    }

    async fn hincr(&self, key: &str, field: &str, amount: i64) {
        if let Err(e) = self.store.hincr_by(key, field, amount).await {
            log::warn!("hash increment failed for {}.{}: {}", key, field, e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
