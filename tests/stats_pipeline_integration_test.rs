//! End-to-end statistics flow: counters written by the tracker are rolled
//! up by the aggregation worker and served back by the query service, with
//! idempotent re-runs and counter resets.

use std::sync::Arc;

use chrono::Utc;

use palisade::db::Database;
use palisade::pipeline::Flag;
use palisade::stats::aggregator::AggregationWorker;
use palisade::stats::query::{StatsQueryService, SummaryRange};
use palisade::stats::rollups;
use palisade::stats::tracker::{RequestOutcome, RequestTracker};
use palisade::stats::ApiKind;
use palisade::store::{CounterStore, MemoryCounterStore};

struct StatsHarness {
    store: Arc<MemoryCounterStore>,
    db: Database,
    tracker: RequestTracker,
    worker: AggregationWorker,
    query: StatsQueryService,
}

async fn harness() -> StatsHarness {
    let store = Arc::new(MemoryCounterStore::new());
    let db = Database::connect_in_memory().await.unwrap();

    StatsHarness {
        tracker: RequestTracker::new(Arc::clone(&store) as Arc<dyn CounterStore>, 500),
        worker: AggregationWorker::new(
            Arc::clone(&store) as Arc<dyn CounterStore>,
            db.clone(),
            500,
        ),
        query: StatsQueryService::new(db.clone(), Arc::clone(&store) as Arc<dyn CounterStore>),
        store,
        db,
    }
}

fn outcome(caller: &str, blocked: bool, cached: bool, latency_ms: u64) -> RequestOutcome {
    RequestOutcome {
        caller_id: caller.to_string(),
        blocked,
        cached,
        flags: if blocked {
            vec![Flag::PhoneNumber]
        } else {
            Vec::new()
        },
        latency_ms,
        api: ApiKind::Text,
        api_error: false,
    }
}

#[tokio::test]
async fn test_tracked_requests_roll_up() {
    let h = harness().await;

    // 10 requests: 3 blocked, 2 cached.
    for i in 0..10 {
        h.tracker
            .record(&outcome("u-main", i < 3, i >= 8, 10 + i))
            .await;
    }

    let report = h.worker.run(false).await.unwrap();
    assert!(report.success, "errors: {:?}", report.errors);

    let today = Utc::now().date_naive();
    let row = rollups::fetch_daily(&h.db, today).await.unwrap().unwrap();
    assert_eq!(row.total_requests, 10);
    assert_eq!(row.filtered_requests, 7);
    assert_eq!(row.blocked_requests, 3);
    assert_eq!(row.cached_requests, 2);
    assert!(row.avg_response_time_ms > 0.0);

    // Flag and caller rollups landed too.
    let flags = rollups::fetch_flags_range(&h.db, today, today).await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].flag_name, "phone_number");
    assert_eq!(flags[0].count, 3);

    let users = rollups::fetch_user_range(&h.db, "u-main", today, today)
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].request_count, 10);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let h = harness().await;

    for _ in 0..5 {
        h.tracker.record(&outcome("u-a", false, false, 20)).await;
    }

    h.worker.run(false).await.unwrap();
    let today = Utc::now().date_naive();
    let first = rollups::fetch_daily(&h.db, today).await.unwrap().unwrap();

    h.worker.run(false).await.unwrap();
    let second = rollups::fetch_daily(&h.db, today).await.unwrap().unwrap();

    assert_eq!(second.total_requests, first.total_requests);
    assert_eq!(second.filtered_requests, first.filtered_requests);
    assert_eq!(second.blocked_requests, first.blocked_requests);
    assert_eq!(second.cached_requests, first.cached_requests);
    assert_eq!(second.created_at, first.created_at);
}

#[tokio::test]
async fn test_aggregation_observes_growth_within_day() {
    let h = harness().await;

    for _ in 0..4 {
        h.tracker.record(&outcome("u-b", false, false, 5)).await;
    }
    h.worker.run(false).await.unwrap();

    for _ in 0..6 {
        h.tracker.record(&outcome("u-b", true, false, 5)).await;
    }
    h.worker.run(false).await.unwrap();

    let today = Utc::now().date_naive();
    let row = rollups::fetch_daily(&h.db, today).await.unwrap().unwrap();
    assert_eq!(row.total_requests, 10);
    assert_eq!(row.blocked_requests, 6);
}

#[tokio::test]
async fn test_clearing_run_resets_then_counts_fresh() {
    let h = harness().await;

    for _ in 0..8 {
        h.tracker.record(&outcome("u-c", false, false, 15)).await;
    }

    let report = h.worker.run(true).await.unwrap();
    assert!(report.success);
    assert!(report.cleared);

    assert_eq!(
        h.store.get("stats:requests:total").await.unwrap(),
        Some("0".to_string())
    );

    // New traffic counts from zero.
    h.tracker.record(&outcome("u-c", false, false, 15)).await;
    assert_eq!(
        h.store.get("stats:requests:total").await.unwrap(),
        Some("1".to_string())
    );
}

#[tokio::test]
async fn test_summary_reads_rollups_and_live_window() {
    let h = harness().await;

    for i in 0..6 {
        h.tracker.record(&outcome("u-d", i % 2 == 0, false, 30)).await;
    }

    // Live window before any aggregation.
    let live = h.query.summary(SummaryRange::Today).await.unwrap();
    assert!(live.live);
    assert_eq!(live.total_requests, 6);
    assert_eq!(live.blocked_requests, 3);

    // All-time summary comes from rollups and is empty until aggregation.
    let all = h.query.summary(SummaryRange::All).await.unwrap();
    assert_eq!(all.total_requests, 0);

    h.worker.run(false).await.unwrap();
    let all = h.query.summary(SummaryRange::All).await.unwrap();
    assert_eq!(all.total_requests, 6);
    assert_eq!(all.filtered_requests, 3);
}

#[tokio::test]
async fn test_api_performance_rollup() {
    let h = harness().await;

    let mut o = outcome("u-e", false, false, 40);
    o.api_error = true;
    h.tracker.record(&o).await;
    h.tracker.record(&outcome("u-e", false, false, 20)).await;

    h.worker.run(false).await.unwrap();

    let now = Utc::now();
    let rows = h
        .query
        .hourly_series(now - chrono::Duration::hours(1), now)
        .await
        .unwrap();

    let text = rows.iter().find(|r| r.api_type == "text").unwrap();
    assert_eq!(text.total_calls, 2);
    assert_eq!(text.error_calls, 1);
    assert!((text.avg_response_time_ms - 30.0).abs() < 1e-9);
    assert!(text.error_calls <= text.total_calls);
}

#[tokio::test]
async fn test_concurrent_aggregation_rejected() {
    let h = harness().await;
    let worker = Arc::new(h.worker);

    // Hold the flag by running a first aggregation to completion, then
    // verify the guard trips when two runs race.
    let a = Arc::clone(&worker);
    let b = Arc::clone(&worker);
    let (ra, rb) = tokio::join!(a.run(false), b.run(false));

    let rejected = ra.is_err() || rb.is_err();
    let succeeded = ra.is_ok() || rb.is_ok();
    assert!(succeeded, "at least one run must complete");
    // With an in-process store both may finish fast enough to serialize;
    // when they do overlap, the loser reports InProgress.
    if rejected {
        assert!(matches!(
            ra.err().or(rb.err()),
            Some(palisade::stats::StatsError::InProgress)
        ));
    }
}
