//! Route-level response cache
//!
//! Wraps the pipeline entry point: a hit returns the cached verdict without
//! running pre-screen or AI. Keys are a fast non-cryptographic hash of
//! `(url, method, credential, normalized body)` where the body
//! normalization trims long fields so hashing stays cheap on 10 MB inputs.

use std::time::Duration;

use crate::cache::{CacheConfig, MemoryCache};
use crate::pipeline::request::{FilterRequest, FilterResult};

/// 32-bit FNV-1a, folded to 16 bits and re-widened for extra mixing, then
/// base36-encoded. Cheap, stable, and short enough for log lines.
pub fn hash_base36(input: &str) -> String {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    // XOR-fold the halves back together to spread high bits into the low
    // half before encoding.
    let folded = hash ^ (hash >> 16);
    let mixed = (u64::from(folded) << 16) | u64::from(hash & 0xffff);

    to_base36(mixed)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

/// Deterministic, trimmed rendering of a request body for key building.
///
/// - text keeps its first and last 100 characters
/// - image content is reduced to its first 50 characters
/// - config serializes with field names in sorted order
/// - history reduces to its length plus the last three turns
pub fn normalize_body(request: &FilterRequest) -> String {
    let text = match &request.text {
        Some(text) => trim_middle(text, 100),
        None => String::new(),
    };

    let image = match &request.image {
        Some(image) => image.chars().take(50).collect(),
        None => String::new(),
    };

    let history_tail: Vec<&str> = request
        .history
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(String::as_str)
        .collect();

    format!(
        "text={}|image={}|config={}|history={}:{}",
        text,
        image,
        request.config.canonical_string(),
        request.history.len(),
        history_tail.join("\u{1f}")
    )
}

fn trim_middle(text: &str, keep: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= keep * 2 {
        return text.to_string();
    }

    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Build the cache key for one request.
pub fn response_cache_key(
    path: &str,
    method: &str,
    credential: &str,
    request: &FilterRequest,
) -> String {
    let composite = format!(
        "{}|{}|{}|{}",
        path,
        method,
        credential,
        normalize_body(request)
    );
    hash_base36(&composite)
}

// ============================================================================
// Cache wrapper
// ============================================================================

/// The route-level response cache.
pub struct ResponseCache {
    cache: MemoryCache,
    ttl: Duration,
}

impl ResponseCache {
    /// Create the cache with the configured TTL.
    pub fn new(config: CacheConfig, ttl: Duration) -> Self {
        Self {
            cache: MemoryCache::new(config),
            ttl,
        }
    }

    /// Look up a cached verdict.
    pub fn get(&self, key: &str) -> Option<FilterResult> {
        self.cache.get(key)
    }

    /// Store a verdict under the configured TTL.
    pub fn store(&self, key: &str, result: &FilterResult) {
        if let Err(e) = self.cache.set(key, result, Some(self.ttl)) {
            log::warn!("response cache store failed: {}", e);
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.cache.clear()
    }

    /// Stop background maintenance.
    pub fn destroy(&self) {
        self.cache.destroy()
    }
}

// ============================================================================
// Tests
// ============================================================================
