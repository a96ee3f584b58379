//! # In-Memory Cache
//!
//! A byte-accounted in-process cache with pluggable eviction, used three
//! times across the service:
//!
//! - response cache, keyed by normalized request hash
//! - AI-result cache, keyed by text + history + config
//! - credential cache, keyed by API key or caller IP
//!
//! ## Behavior
//!
//! - Values are serialized with `serde_json`; payloads above a configurable
//!   threshold are gzip-compressed when that actually shrinks them
//! - Both an entry-count ceiling and a byte ceiling are enforced before
//!   every insert; victims are chosen by the configured [`EvictionPolicy`]
//! - Expired entries are never returned and are dropped on access and by a
//!   periodic maintenance sweep (every 30 s by default)
//! - All operations take one exclusive lock; nothing suspends while it is
//!   held, and (de)serialization happens outside the critical section

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

pub mod compression;
pub mod eviction;

pub use eviction::EvictionPolicy;

/// Cache error types
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value could not be serialized for storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),
}

/// Cache result alias
pub type Result<T> = std::result::Result<T, CacheError>;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for one cache instance
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Instance name used in log lines and statistics
    pub name: String,

    /// Maximum number of entries
    pub max_entries: usize,

    /// Maximum total payload bytes
    pub max_bytes: usize,

    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,

    /// Serialized payloads larger than this are candidates for compression
    pub compression_threshold: usize,

    /// Eviction policy
    pub policy: EvictionPolicy,

    /// Interval between maintenance sweeps
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            compression_threshold: 4096,
            policy: EvictionPolicy::Hybrid,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Entries and statistics
// ============================================================================

/// A stored entry with access metadata
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    /// Serialized (possibly compressed) payload
    pub(crate) data: Vec<u8>,

    /// Whether `data` is gzip-compressed
    pub(crate) compressed: bool,

    /// When the entry was inserted
    pub(crate) created_at: Instant,

    /// When the entry stops being served
    pub(crate) expires_at: Instant,

    /// Last read access
    pub(crate) last_access: Instant,

    /// Read count, starting at 1 on insertion
    pub(crate) frequency: u64,

    /// Accounted payload size
    pub(crate) size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time statistics for one cache instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Instance name
    pub name: String,
    /// Live entry count
    pub entries: usize,
    /// Accounted payload bytes
    pub total_bytes: usize,
    /// Configured byte ceiling
    pub max_bytes: usize,
    /// Hits since creation
    pub hits: u64,
    /// Misses since creation
    pub misses: u64,
    /// Evictions since creation
    pub evictions: u64,
    /// Entries dropped because they expired
    pub expirations: u64,
    /// hits / (hits + misses)
    pub hit_rate: f64,
    /// Human-readable memory usage
    pub memory_usage: String,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

// ============================================================================
// Cache
// ============================================================================

/// Byte-accounted in-memory cache with pluggable eviction.
///
/// Cloning is cheap; clones share the same storage and statistics.
#[derive(Clone)]
pub struct MemoryCache {
    config: Arc<CacheConfig>,
    state: Arc<Mutex<CacheState>>,
    maintenance: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryCache {
    /// Create a cache and start its maintenance sweep when a Tokio runtime
    /// is available.
    pub fn new(config: CacheConfig) -> Self {
        let cache = Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CacheState::default())),
            maintenance: Arc::new(Mutex::new(None)),
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            cache.start_maintenance();
        }

        cache
    }

    /// Look up a value, updating recency and frequency on hit.
    ///
    /// Expired entries are removed as a side effect and reported as misses.
    /// Corrupt entries are dropped and reported as misses.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let now = Instant::now();

        let (data, compressed) = {
            let mut state = self.state.lock();

            let expired = match state.entries.get(key) {
                Some(entry) => entry.is_expired(now),
                None => {
                    state.misses += 1;
                    return None;
                }
            };

            if expired {
                if let Some(entry) = state.entries.remove(key) {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                }
                state.expirations += 1;
                state.misses += 1;
                return None;
            }

            let payload = match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.last_access = now;
                    entry.frequency += 1;
                    (entry.data.clone(), entry.compressed)
                }
                None => {
                    state.misses += 1;
                    return None;
                }
            };
            state.hits += 1;
            payload
        };

        let raw = if compressed {
            match compression::decompress(&data) {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("{}: dropping corrupt entry: {}", self.config.name, e);
                    self.remove(key);
                    return None;
                }
            }
        } else {
            data
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("{}: dropping undeserializable entry: {}", self.config.name, e);
                self.remove(key);
                None
            }
        }
    }

    /// Insert a value, evicting until both the entry-count and byte ceilings
    /// hold.
    pub fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let size_bytes = estimate_size(&json);
        let (data, compressed) =
            compression::maybe_compress(json.into_bytes(), self.config.compression_threshold);

        if size_bytes > self.config.max_bytes {
            log::debug!(
                "{}: refusing oversized entry ({} bytes > {} cap)",
                self.config.name,
                size_bytes,
                self.config.max_bytes
            );
            return Ok(());
        }

        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let entry = CacheEntry {
            data,
            compressed,
            created_at: now,
            expires_at: now + ttl,
            last_access: now,
            frequency: 1,
            size_bytes,
        };

        let mut state = self.state.lock();

        if let Some(old) = state.entries.remove(key) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }

        while !state.entries.is_empty()
            && (state.entries.len() >= self.config.max_entries
                || state.total_bytes + size_bytes > self.config.max_bytes)
        {
            let victim = eviction::select_victim(self.config.policy, &state.entries, now);
            match victim {
                Some(victim_key) => {
                    if let Some(evicted) = state.entries.remove(&victim_key) {
                        state.total_bytes =
                            state.total_bytes.saturating_sub(evicted.size_bytes);
                        state.evictions += 1;
                    }
                }
                None => break,
            }
        }

        state.total_bytes += size_bytes;
        state.entries.insert(key.to_string(), entry);

        Ok(())
    }

    /// Remove one entry.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(key) {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
        }
    }

    /// Drop every entry, keeping counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    /// Snapshot statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.hits + state.misses;
        let hit_rate = if lookups > 0 {
            state.hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheStats {
            name: self.config.name.clone(),
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            max_bytes: self.config.max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            hit_rate,
            memory_usage: format!(
                "{} / {}",
                format_bytes(state.total_bytes),
                format_bytes(self.config.max_bytes)
            ),
        }
    }

    /// Stop the maintenance task and drop all entries.
    pub fn destroy(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        self.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.state)
    }

    /// The task holds only a weak reference to the storage, so dropping the
    /// last cache handle ends the sweep instead of leaking it.
    fn start_maintenance(&self) {
        let state = Arc::downgrade(&self.state);
        let interval = self.config.maintenance_interval;
        let name = self.config.name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let removed = sweep(&state);
                if removed > 0 {
                    log::debug!("{}: maintenance dropped {} expired entries", name, removed);
                }
                let (entries, total_bytes) = {
                    let state = state.lock();
                    (state.entries.len(), state.total_bytes)
                };
                log::trace!(
                    "{}: {} entries, {}",
                    name,
                    entries,
                    format_bytes(total_bytes)
                );
            }
        });

        *self.maintenance.lock() = Some(handle);
    }
}

fn sweep(state: &Mutex<CacheState>) -> usize {
    let now = Instant::now();
    let mut state = state.lock();

    let expired: Vec<String> = state
        .entries
        .iter()
        .filter(|(_, e)| e.is_expired(now))
        .map(|(k, _)| k.clone())
        .collect();

    for key in &expired {
        if let Some(entry) = state.entries.remove(key) {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
            state.expirations += 1;
        }
    }

    expired.len()
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        // Last clone going away takes the maintenance task with it.
        if Arc::strong_count(&self.maintenance) == 1 {
            if let Some(handle) = self.maintenance.lock().take() {
                handle.abort();
            }
        }
    }
}

/// UTF-16-sized estimate of a serialized value's footprint, with a 1 KB
/// fallback for empty payloads.
fn estimate_size(json: &str) -> usize {
    let units = json.encode_utf16().count();
    if units == 0 {
        1024
    } else {
        units * 2
    }
}

/// Render a byte count for log lines and statistics.
fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;

    let bytes = bytes as f64;
    if bytes >= MB {
        format!("{:.1} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
