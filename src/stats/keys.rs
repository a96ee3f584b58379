//! Counter key layout in the distributed store
//!
//! All statistics share the `stats:` prefix except the per-API-type timing
//! hashes, which live under `api:stats:`. Counters are absolute within a
//! rollup window; the aggregator snapshots them and optionally resets them
//! to "0".

use super::ApiKind;
use crate::pipeline::request::Flag;

/// Total requests served.
pub const REQUESTS_TOTAL: &str = "stats:requests:total";

/// Requests that ended blocked.
pub const REQUESTS_BLOCKED: &str = "stats:requests:blocked";

/// Requests answered from the response cache.
pub const REQUESTS_CACHED: &str = "stats:requests:cached";

/// Recent latency samples, newest at the head.
pub const LATENCY_ALL: &str = "stats:latency:all";

/// Scan pattern for per-caller counters.
pub const USER_PATTERN: &str = "stats:requests:user:*";

/// Scan pattern for per-flag counters.
pub const FLAG_PATTERN: &str = "stats:flags:*";

/// Per-caller request counter.
pub fn user_key(caller_id: &str) -> String {
    format!("stats:requests:user:{}", caller_id)
}

/// Caller id embedded in a per-caller counter key.
pub fn caller_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("stats:requests:user:")
}

/// Per-flag counter.
pub fn flag_key(flag: Flag) -> String {
    format!("stats:flags:{}", flag.as_str())
}

/// Flag name embedded in a per-flag counter key.
pub fn flag_name_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("stats:flags:")
}

/// Per-API-type timing hash (`calls`, `errors`, `total_time` fields).
pub fn api_stats_key(kind: ApiKind) -> String {
    format!("api:stats:{}", kind.as_str())
}
