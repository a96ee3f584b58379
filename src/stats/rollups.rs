//! Rollup rows and their idempotent upserts
//!
//! Every upsert wraps select-then-update-or-insert in a transaction keyed
//! by the row's natural key, so a re-run with the same counter values
//! rewrites the row to identical content (`updated_at` aside). Counters are
//! absolute within their window, which is what makes overwrite-upserts
//! converge instead of double-counting.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::Result;
use crate::db::Database;

// ============================================================================
// Row types
// ============================================================================

/// One day of request totals.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatsDaily {
    /// Calendar day (primary key)
    pub date: NaiveDate,
    /// Requests served
    pub total_requests: i64,
    /// total − blocked
    pub filtered_requests: i64,
    /// Requests that ended blocked
    pub blocked_requests: i64,
    /// Requests answered from cache
    pub cached_requests: i64,
    /// Mean latency over the recent-sample list
    pub avg_response_time_ms: f64,
    /// 95th percentile latency
    pub p95_response_time_ms: f64,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last overwrite time
    pub updated_at: DateTime<Utc>,
}

/// One hour of per-API-type call performance, unique by (timestamp, type).
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiPerformanceHourly {
    /// Hour bucket
    pub timestamp: DateTime<Utc>,
    /// `text` or `image`
    pub api_type: String,
    /// Calls this hour
    pub total_calls: i64,
    /// Failed calls this hour
    pub error_calls: i64,
    /// Mean latency
    pub avg_response_time_ms: f64,
}

/// One day of one flag's occurrences, unique by (date, flag).
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContentFlagsDaily {
    /// Calendar day
    pub date: NaiveDate,
    /// Flag wire name
    pub flag_name: String,
    /// Occurrences
    pub count: i64,
}

/// One day of one caller's activity, unique by (date, caller).
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityDaily {
    /// Calendar day
    pub date: NaiveDate,
    /// Caller id
    pub user_id: String,
    /// Requests that day
    pub request_count: i64,
    /// Always 0: no per-caller blocked counter exists yet
    pub blocked_count: i64,
}

// ============================================================================
// Upserts
// ============================================================================

/// Upsert the daily request-stats row.
pub async fn upsert_request_stats(
    db: &Database,
    date: NaiveDate,
    total: i64,
    blocked: i64,
    cached: i64,
    avg_ms: f64,
    p95_ms: f64,
) -> Result<()> {
    let now = Utc::now();
    let filtered = total - blocked;
    let mut tx = db.pool().begin().await?;

    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM request_stats_daily WHERE date = $1")
            .bind(date)
            .fetch_optional(&mut *tx)
            .await?;

    if exists.is_some() {
        sqlx::query(
            r"
            UPDATE request_stats_daily
            SET total_requests = $2,
                filtered_requests = $3,
                blocked_requests = $4,
                cached_requests = $5,
                avg_response_time_ms = $6,
                p95_response_time_ms = $7,
                updated_at = $8
            WHERE date = $1
            ",
        )
        .bind(date)
        .bind(total)
        .bind(filtered)
        .bind(blocked)
        .bind(cached)
        .bind(avg_ms)
        .bind(p95_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r"
            INSERT INTO request_stats_daily
                (date, total_requests, filtered_requests, blocked_requests,
                 cached_requests, avg_response_time_ms, p95_response_time_ms,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ",
        )
        .bind(date)
        .bind(total)
        .bind(filtered)
        .bind(blocked)
        .bind(cached)
        .bind(avg_ms)
        .bind(p95_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Upsert one (hour, api type) performance row.
pub async fn upsert_api_performance(
    db: &Database,
    timestamp: DateTime<Utc>,
    api_type: &str,
    total_calls: i64,
    error_calls: i64,
    avg_ms: f64,
) -> Result<()> {
    let mut tx = db.pool().begin().await?;

    let exists: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM api_performance_hourly WHERE timestamp = $1 AND api_type = $2",
    )
    .bind(timestamp)
    .bind(api_type)
    .fetch_optional(&mut *tx)
    .await?;

    if exists.is_some() {
        sqlx::query(
            r"
            UPDATE api_performance_hourly
            SET total_calls = $3, error_calls = $4, avg_response_time_ms = $5
            WHERE timestamp = $1 AND api_type = $2
            ",
        )
        .bind(timestamp)
        .bind(api_type)
        .bind(total_calls)
        .bind(error_calls)
        .bind(avg_ms)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r"
            INSERT INTO api_performance_hourly
                (timestamp, api_type, total_calls, error_calls, avg_response_time_ms)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(timestamp)
        .bind(api_type)
        .bind(total_calls)
        .bind(error_calls)
        .bind(avg_ms)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Upsert one (day, flag) occurrence row.
pub async fn upsert_content_flag(
    db: &Database,
    date: NaiveDate,
    flag_name: &str,
    count: i64,
) -> Result<()> {
    let mut tx = db.pool().begin().await?;

    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM content_flags_daily WHERE date = $1 AND flag_name = $2")
            .bind(date)
            .bind(flag_name)
            .fetch_optional(&mut *tx)
            .await?;

    if exists.is_some() {
        sqlx::query(
            "UPDATE content_flags_daily SET count = $3 WHERE date = $1 AND flag_name = $2",
        )
        .bind(date)
        .bind(flag_name)
        .bind(count)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query("INSERT INTO content_flags_daily (date, flag_name, count) VALUES ($1, $2, $3)")
            .bind(date)
            .bind(flag_name)
            .bind(count)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Upsert one (day, caller) activity row.
pub async fn upsert_user_activity(
    db: &Database,
    date: NaiveDate,
    user_id: &str,
    request_count: i64,
    blocked_count: i64,
) -> Result<()> {
    let mut tx = db.pool().begin().await?;

    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM user_activity_daily WHERE date = $1 AND user_id = $2")
            .bind(date)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

    if exists.is_some() {
        sqlx::query(
            r"
            UPDATE user_activity_daily
            SET request_count = $3, blocked_count = $4
            WHERE date = $1 AND user_id = $2
            ",
        )
        .bind(date)
        .bind(user_id)
        .bind(request_count)
        .bind(blocked_count)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r"
            INSERT INTO user_activity_daily (date, user_id, request_count, blocked_count)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(date)
        .bind(user_id)
        .bind(request_count)
        .bind(blocked_count)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

// ============================================================================
// Range reads
// ============================================================================

/// Daily rows in an inclusive date range, ascending.
pub async fn fetch_daily_range(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<RequestStatsDaily>> {
    let rows = sqlx::query_as(
        r"
        SELECT date, total_requests, filtered_requests, blocked_requests,
               cached_requests, avg_response_time_ms, p95_response_time_ms,
               created_at, updated_at
        FROM request_stats_daily
        WHERE date >= $1 AND date <= $2
        ORDER BY date ASC
        ",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db.pool())
    .await?;
    Ok(rows)
}

/// One daily row.
pub async fn fetch_daily(db: &Database, date: NaiveDate) -> Result<Option<RequestStatsDaily>> {
    let row = sqlx::query_as(
        r"
        SELECT date, total_requests, filtered_requests, blocked_requests,
               cached_requests, avg_response_time_ms, p95_response_time_ms,
               created_at, updated_at
        FROM request_stats_daily
        WHERE date = $1
        ",
    )
    .bind(date)
    .fetch_optional(db.pool())
    .await?;
    Ok(row)
}

/// Hourly API-performance rows in an inclusive range, ascending.
pub async fn fetch_hourly_range(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<ApiPerformanceHourly>> {
    let rows = sqlx::query_as(
        r"
        SELECT timestamp, api_type, total_calls, error_calls, avg_response_time_ms
        FROM api_performance_hourly
        WHERE timestamp >= $1 AND timestamp <= $2
        ORDER BY timestamp ASC, api_type ASC
        ",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db.pool())
    .await?;
    Ok(rows)
}

/// Per-flag rows in an inclusive date range.
pub async fn fetch_flags_range(
    db: &Database,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ContentFlagsDaily>> {
    let rows = sqlx::query_as(
        r"
        SELECT date, flag_name, count
        FROM content_flags_daily
        WHERE date >= $1 AND date <= $2
        ORDER BY date ASC, flag_name ASC
        ",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db.pool())
    .await?;
    Ok(rows)
}

/// One caller's activity rows in an inclusive date range.
pub async fn fetch_user_range(
    db: &Database,
    user_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<UserActivityDaily>> {
    let rows = sqlx::query_as(
        r"
        SELECT date, user_id, request_count, blocked_count
        FROM user_activity_daily
        WHERE user_id = $1 AND date >= $2 AND date <= $3
        ORDER BY date ASC
        ",
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(db.pool())
    .await?;
    Ok(rows)
}

// ============================================================================
// Tests
// ============================================================================
