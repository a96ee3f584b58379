//! Aggregation worker
//!
//! Snapshots the distributed counters into the relational rollup tables.
//! Runs from the manual `/stats/aggregate` endpoint or on a schedule; a
//! process-local in-progress flag rejects concurrent runs. Each of the four
//! sub-aggregations is independent: one failing does not stop the others,
//! and the report carries a per-task success map plus collected errors.
//!
//! Counter resets (when requested) only happen after every sub-task
//! succeeded, so a partial failure never loses counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DurationRound, Utc};
use serde::Serialize;

use super::{keys, rollups, ApiKind, Result, StatsError};
use crate::db::Database;
use crate::store::CounterStore;

/// How long startup waits for the store to report ready.
const READY_WAIT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for readiness.
const READY_POLL: Duration = Duration::from_millis(500);

/// Outcome of one aggregation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    /// True iff every sub-task succeeded
    pub success: bool,
    /// Per-task success map
    pub tasks: BTreeMap<String, bool>,
    /// Collected error descriptions
    pub errors: Vec<String>,
    /// Whether counters were reset afterwards
    pub cleared: bool,
}

/// Average and percentiles over the recent latency samples.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    /// Mean
    pub avg_ms: f64,
    /// Median
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
}

impl LatencySummary {
    /// Compute from unsorted samples: sort ascending, index by
    /// `floor(n * q)`.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        samples.sort_by(|a, b| a.total_cmp(b));
        let n = samples.len();
        let pick = |q: f64| samples[((n as f64 * q) as usize).min(n - 1)];

        Self {
            avg_ms: samples.iter().sum::<f64>() / n as f64,
            p50_ms: pick(0.50),
            p95_ms: pick(0.95),
            p99_ms: pick(0.99),
        }
    }
}

/// The Redis → relational aggregation worker.
pub struct AggregationWorker {
    store: Arc<dyn CounterStore>,
    db: Database,
    in_progress: AtomicBool,
    latency_retention: usize,
}

impl AggregationWorker {
    /// Build a worker. `latency_retention` is the sample count kept after a
    /// clearing run (default 500).
    pub fn new(store: Arc<dyn CounterStore>, db: Database, latency_retention: usize) -> Self {
        Self {
            store,
            db,
            in_progress: AtomicBool::new(false),
            latency_retention: latency_retention.max(1),
        }
    }

    /// Run all sub-aggregations, optionally resetting counters afterwards.
    ///
    /// Returns [`StatsError::InProgress`] when another run is in flight.
    pub async fn run(&self, clear_counters: bool) -> Result<AggregationReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("aggregation requested while another run is in progress");
            return Err(StatsError::InProgress);
        }

        let report = self.run_locked(clear_counters).await;
        self.in_progress.store(false, Ordering::SeqCst);
        report
    }

    async fn run_locked(&self, clear_counters: bool) -> Result<AggregationReport> {
        self.wait_for_store_ready().await;

        let mut tasks = BTreeMap::new();
        let mut errors = Vec::new();

        let results: [(&str, std::result::Result<(), StatsError>); 4] = [
            ("request_stats", self.aggregate_request_stats().await),
            ("api_performance", self.aggregate_api_performance().await),
            ("content_flags", self.aggregate_content_flags().await),
            ("user_activity", self.aggregate_user_activity().await),
        ];

        for (name, result) in results {
            match result {
                Ok(()) => {
                    tasks.insert(name.to_string(), true);
                }
                Err(e) => {
                    log::error!("aggregation task {} failed: {}", name, e);
                    errors.push(format!("{}: {}", name, e));
                    tasks.insert(name.to_string(), false);
                }
            }
        }

        let mut success = tasks.values().all(|ok| *ok);
        let mut cleared = false;

        if clear_counters {
            if success {
                match self.reset_counters().await {
                    Ok(()) => cleared = true,
                    Err(e) => {
                        log::error!("counter reset failed: {}", e);
                        errors.push(format!("reset: {}", e));
                        success = false;
                    }
                }
            } else {
                log::warn!("skipping counter reset: not all aggregation tasks succeeded");
            }
        }

        Ok(AggregationReport {
            success,
            tasks,
            errors,
            cleared,
        })
    }

    /// Wait up to ten seconds for the store, then proceed regardless. A
    /// worker started alongside the server must not read counters before
    /// the store accepts commands, or it would snapshot an empty window.
    async fn wait_for_store_ready(&self) {
        let deadline = tokio::time::Instant::now() + READY_WAIT;

        loop {
            if self.store.ping().await.is_ok() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("counter store not ready after 10s, aggregating anyway");
                return;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn aggregate_request_stats(&self) -> Result<()> {
        let counters = self
            .store
            .mget(&[
                keys::REQUESTS_TOTAL.to_string(),
                keys::REQUESTS_BLOCKED.to_string(),
                keys::REQUESTS_CACHED.to_string(),
            ])
            .await?;

        let total = parse_counter(counters.first());
        let blocked = parse_counter(counters.get(1));
        let cached = parse_counter(counters.get(2));

        let samples: Vec<f64> = self
            .store
            .lrange(keys::LATENCY_ALL, 0, -1)
            .await?
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let latency = LatencySummary::from_samples(samples);

        rollups::upsert_request_stats(
            &self.db,
            Utc::now().date_naive(),
            total,
            blocked,
            cached,
            latency.avg_ms,
            latency.p95_ms,
        )
        .await
    }

    async fn aggregate_api_performance(&self) -> Result<()> {
        let hour = Utc::now()
            .duration_trunc(chrono::Duration::hours(1))
            .expect("hour truncation");

        for kind in ApiKind::all() {
            let hash = self.store.hgetall(&keys::api_stats_key(kind)).await?;

            let calls = parse_field(&hash, "calls");
            if calls == 0 {
                continue;
            }
            let errors = parse_field(&hash, "errors");
            let total_time = parse_field(&hash, "total_time");
            let avg_ms = total_time as f64 / calls as f64;

            rollups::upsert_api_performance(&self.db, hour, kind.as_str(), calls, errors, avg_ms)
                .await?;
        }

        Ok(())
    }

    async fn aggregate_content_flags(&self) -> Result<()> {
        let today = Utc::now().date_naive();

        for key in self.store.scan_match(keys::FLAG_PATTERN).await? {
            let Some(flag_name) = keys::flag_name_from_key(&key) else {
                continue;
            };
            let count = match self.store.get(&key).await? {
                Some(value) => value.parse().unwrap_or(0),
                None => 0,
            };
            if count == 0 {
                continue;
            }
            rollups::upsert_content_flag(&self.db, today, flag_name, count).await?;
        }

        Ok(())
    }

    async fn aggregate_user_activity(&self) -> Result<()> {
        let today = Utc::now().date_naive();

        for key in self.store.scan_match(keys::USER_PATTERN).await? {
            let Some(caller_id) = keys::caller_id_from_key(&key) else {
                continue;
            };
            let count = match self.store.get(&key).await? {
                Some(value) => value.parse().unwrap_or(0),
                None => 0,
            };
            if count == 0 {
                continue;
            }
            // blocked_count stays 0: no per-caller blocked counter exists.
            rollups::upsert_user_activity(&self.db, today, caller_id, count, 0).await?;
        }

        Ok(())
    }

    /// Reset counters to "0" (not delete), zero the per-API hashes, reset
    /// every per-caller counter, and trim the latency list.
    async fn reset_counters(&self) -> Result<()> {
        for key in [
            keys::REQUESTS_TOTAL,
            keys::REQUESTS_BLOCKED,
            keys::REQUESTS_CACHED,
        ] {
            self.store.set(key, "0", None).await?;
        }

        let zeroed: Vec<(String, String)> = ["calls", "errors", "total_time"]
            .iter()
            .map(|f| (f.to_string(), "0".to_string()))
            .collect();
        for kind in ApiKind::all() {
            self.store
                .hset_multiple(&keys::api_stats_key(kind), &zeroed)
                .await?;
        }

        for key in self.store.scan_match(keys::USER_PATTERN).await? {
            self.store.set(&key, "0", None).await?;
        }

        self.store
            .ltrim(keys::LATENCY_ALL, 0, self.latency_retention as i64 - 1)
            .await?;

        log::info!("distributed counters reset after aggregation");
        Ok(())
    }
}

fn parse_counter(value: Option<&Option<String>>) -> i64 {
    value
        .and_then(|v| v.as_ref())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn parse_field(hash: &std::collections::HashMap<String, String>, field: &str) -> i64 {
    hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
