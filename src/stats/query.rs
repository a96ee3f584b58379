//! Statistics query service
//!
//! Serves the `/stats/*` read endpoints. Queries hit the rollup tables
//! first; the live counters in the distributed store are only consulted for
//! the current, not-yet-aggregated window (the `today` summary and the AI
//! monitor), falling back to rollups when the store is unreachable.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;

use super::{keys, rollups, ApiKind, Result};
use crate::db::Database;
use crate::store::CounterStore;

/// Time windows accepted by the summary endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryRange {
    /// Current day (live counters)
    Today,
    /// Previous day
    Yesterday,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
    /// Everything on record
    All,
}

impl SummaryRange {
    /// Parse a range name from the query string.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "today" => Some(Self::Today),
            "yesterday" => Some(Self::Yesterday),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Week => "7d",
            Self::Month => "30d",
            Self::All => "all",
        }
    }

    fn date_bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Today => (today, today),
            Self::Yesterday => {
                let y = today - ChronoDuration::days(1);
                (y, y)
            }
            Self::Week => (today - ChronoDuration::days(6), today),
            Self::Month => (today - ChronoDuration::days(29), today),
            Self::All => (NaiveDate::from_ymd_opt(2000, 1, 1).expect("epoch date"), today),
        }
    }
}

/// Aggregated totals for one time range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    /// Requested range
    pub range: String,
    /// Total requests
    pub total_requests: i64,
    /// total − blocked
    pub filtered_requests: i64,
    /// Blocked requests
    pub blocked_requests: i64,
    /// Cache-served requests
    pub cached_requests: i64,
    /// Request-weighted mean latency
    pub avg_response_time_ms: f64,
    /// Days with data in the range
    pub days_with_data: usize,
    /// Whether live counters contributed (today only)
    pub live: bool,
}

/// Live per-API-type call statistics from the counter hashes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLiveStats {
    /// `text` or `image`
    pub api_type: String,
    /// Calls since the last counter reset
    pub calls: i64,
    /// Failed calls since the last reset
    pub errors: i64,
    /// Mean latency
    pub avg_response_time_ms: f64,
}

/// Reachability of the service's dependencies.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Distributed store reachable
    pub redis: bool,
    /// Relational store reachable
    pub database: bool,
}

impl HealthReport {
    /// Overall verdict.
    pub fn healthy(&self) -> bool {
        self.redis && self.database
    }
}

// ============================================================================
// Service
// ============================================================================

/// Read side of the statistics subsystem.
pub struct StatsQueryService {
    db: Database,
    store: Arc<dyn CounterStore>,
}

impl StatsQueryService {
    /// Build the query service.
    pub fn new(db: Database, store: Arc<dyn CounterStore>) -> Self {
        Self { db, store }
    }

    /// Summary over a time range. `today` prefers the live counters since
    /// the rollup row is only as fresh as the last aggregation.
    pub async fn summary(&self, range: SummaryRange) -> Result<SummaryReport> {
        let today = Utc::now().date_naive();

        if range == SummaryRange::Today {
            if let Some(live) = self.live_today().await {
                return Ok(live);
            }
        }

        let (from, to) = range.date_bounds(today);
        let rows = rollups::fetch_daily_range(&self.db, from, to).await?;

        let total: i64 = rows.iter().map(|r| r.total_requests).sum();
        let blocked: i64 = rows.iter().map(|r| r.blocked_requests).sum();
        let cached: i64 = rows.iter().map(|r| r.cached_requests).sum();
        let weighted_latency: f64 = rows
            .iter()
            .map(|r| r.avg_response_time_ms * r.total_requests as f64)
            .sum();

        Ok(SummaryReport {
            range: range.as_str().to_string(),
            total_requests: total,
            filtered_requests: total - blocked,
            blocked_requests: blocked,
            cached_requests: cached,
            avg_response_time_ms: if total > 0 {
                weighted_latency / total as f64
            } else {
                0.0
            },
            days_with_data: rows.len(),
            live: false,
        })
    }

    async fn live_today(&self) -> Option<SummaryReport> {
        let counters = self
            .store
            .mget(&[
                keys::REQUESTS_TOTAL.to_string(),
                keys::REQUESTS_BLOCKED.to_string(),
                keys::REQUESTS_CACHED.to_string(),
            ])
            .await
            .ok()?;

        let parse = |idx: usize| -> i64 {
            counters
                .get(idx)
                .and_then(|v| v.as_ref())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        let total = parse(0);
        let blocked = parse(1);
        let cached = parse(2);

        let samples: Vec<f64> = self
            .store
            .lrange(keys::LATENCY_ALL, 0, -1)
            .await
            .ok()?
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let avg = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };

        Some(SummaryReport {
            range: SummaryRange::Today.as_str().to_string(),
            total_requests: total,
            filtered_requests: total - blocked,
            blocked_requests: blocked,
            cached_requests: cached,
            avg_response_time_ms: avg,
            days_with_data: usize::from(total > 0),
            live: true,
        })
    }

    /// Daily time series between two dates, inclusive.
    pub async fn daily_series(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<rollups::RequestStatsDaily>> {
        rollups::fetch_daily_range(&self.db, from, to).await
    }

    /// Hourly API-performance series between two instants.
    pub async fn hourly_series(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<rollups::ApiPerformanceHourly>> {
        rollups::fetch_hourly_range(&self.db, from, to).await
    }

    /// Per-flag occurrence rows between two dates.
    pub async fn flags_series(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<rollups::ContentFlagsDaily>> {
        rollups::fetch_flags_range(&self.db, from, to).await
    }

    /// One caller's activity between two dates.
    pub async fn user_history(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<rollups::UserActivityDaily>> {
        rollups::fetch_user_range(&self.db, user_id, from, to).await
    }

    /// Live per-API-type statistics for the AI monitor.
    pub async fn api_live_stats(&self) -> Result<Vec<ApiLiveStats>> {
        let mut out = Vec::with_capacity(2);

        for kind in ApiKind::all() {
            let hash = self.store.hgetall(&keys::api_stats_key(kind)).await?;
            let field = |name: &str| -> i64 {
                hash.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
            };

            let calls = field("calls");
            let total_time = field("total_time");
            out.push(ApiLiveStats {
                api_type: kind.as_str().to_string(),
                calls,
                errors: field("errors"),
                avg_response_time_ms: if calls > 0 {
                    total_time as f64 / calls as f64
                } else {
                    0.0
                },
            });
        }

        Ok(out)
    }

    /// Dependency reachability for the health endpoint.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            redis: self.store.ping().await.is_ok(),
            database: self.db.health_check().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
