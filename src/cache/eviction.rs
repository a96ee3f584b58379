//! Eviction policies for the in-memory cache
//!
//! Four policies are selectable at cache construction:
//!
//! - **LRU**: evict the entry with the oldest last access
//! - **LFU**: evict the entry with the lowest access frequency
//! - **Time-aware**: evict the entry closest to expiry relative to its
//!   lifetime, weighted against how often it is read
//! - **Hybrid** (default): weighted blend of frequency, recency and size

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::CacheEntry;

/// Eviction policy selectable at cache construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
    /// Age-relative-to-expiry weighted by frequency
    TimeAware,
    /// Blend of frequency, recency and entry size
    Hybrid,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// Pick the key to evict under the given policy.
///
/// Returns `None` when the map is empty. The scan is linear; the cache holds
/// its lock for the duration, so entry counts stay bounded by configuration.
pub(super) fn select_victim(
    policy: EvictionPolicy,
    entries: &HashMap<String, CacheEntry>,
    now: Instant,
) -> Option<String> {
    match policy {
        EvictionPolicy::Lru => entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Lfu => entries
            .iter()
            .min_by_key(|(_, e)| e.frequency)
            .map(|(k, _)| k.clone()),
        EvictionPolicy::TimeAware => entries
            .iter()
            .map(|(k, e)| (k, time_aware_score(e, now)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Hybrid => entries
            .iter()
            .map(|(k, e)| (k, hybrid_score(e, now)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k.clone()),
    }
}

/// Score = age ratio within the entry's lifetime plus an inverse-frequency
/// term. Higher scores evict first.
fn time_aware_score(entry: &CacheEntry, now: Instant) -> f64 {
    let lifetime = entry
        .expires_at
        .saturating_duration_since(entry.created_at)
        .as_secs_f64();
    let age = now.saturating_duration_since(entry.created_at).as_secs_f64();

    let age_ratio = if lifetime > 0.0 { age / lifetime } else { 1.0 };
    age_ratio + 1.0 / (entry.frequency as f64 + 1.0)
}

/// Score = 0.4 * inverse frequency + 0.4 * days since last access
/// + 0.2 * size in megabytes. Higher scores evict first.
fn hybrid_score(entry: &CacheEntry, now: Instant) -> f64 {
    let days_since_access =
        now.saturating_duration_since(entry.last_access).as_secs_f64() / 86_400.0;
    let size_mb = entry.size_bytes as f64 / (1024.0 * 1024.0);

    0.4 * (1.0 / (entry.frequency as f64 + 1.0)) + 0.4 * days_since_access + 0.2 * size_mb
}
