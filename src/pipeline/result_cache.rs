//! AI-result cache
//!
//! Caches parsed verdicts keyed by (text, history shape, normalized
//! config), so identical content is never sent to a provider twice within
//! the TTL. Results carrying the `error` flag are never stored; caching a
//! transient upstream failure would pin it for the TTL.
//!
//! TTLs are adaptive: a clear allow is stable and caches long, a block is
//! more likely to be re-judged (model updates, marginal content) and caches
//! short.

use std::time::Duration;

use crate::cache::{CacheConfig, MemoryCache};
use crate::pipeline::request::{FilterConfig, FilterResult};
use crate::pipeline::response_cache::hash_base36;

/// Default TTL for allow results.
pub const ALLOW_TTL: Duration = Duration::from_secs(3600);

/// Default TTL for blocked results.
pub const BLOCK_TTL: Duration = Duration::from_secs(300);

/// Build the cache key for one analysis.
///
/// History contributes its length and last three turns, matching the prompt
/// compression closely enough that distinct contexts stay distinct.
pub fn result_cache_key(text: &str, history: &[String], config: &FilterConfig) -> String {
    let history_tail: Vec<&str> = history
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(String::as_str)
        .collect();

    let composite = format!(
        "{}\u{1f}{}:{}\u{1f}{}",
        text,
        history.len(),
        history_tail.join("\u{1e}"),
        config.canonical_string()
    );
    hash_base36(&composite)
}

/// The AI-result cache.
pub struct AiResultCache {
    cache: MemoryCache,
    allow_ttl: Duration,
    block_ttl: Duration,
}

impl AiResultCache {
    /// Create the cache with default adaptive TTLs.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            cache: MemoryCache::new(config),
            allow_ttl: ALLOW_TTL,
            block_ttl: BLOCK_TTL,
        }
    }

    /// Override the adaptive TTL pair.
    pub fn with_ttls(mut self, allow_ttl: Duration, block_ttl: Duration) -> Self {
        self.allow_ttl = allow_ttl;
        self.block_ttl = block_ttl;
        self
    }

    /// Look up a cached verdict.
    pub fn get(&self, key: &str) -> Option<FilterResult> {
        self.cache.get(key)
    }

    /// Store a verdict unless it records a provider failure.
    pub fn store(&self, key: &str, result: &FilterResult) {
        if !result.is_cacheable() {
            return;
        }

        let ttl = if result.blocked {
            self.block_ttl
        } else {
            self.allow_ttl
        };

        if let Err(e) = self.cache.set(key, result, Some(ttl)) {
            log::warn!("AI-result cache store failed: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::request::Flag;

    #[test]
    fn test_key_depends_on_text_history_config() {
        let config = FilterConfig::default();
        let base = result_cache_key("text", &[], &config);

        assert_eq!(result_cache_key("text", &[], &config), base);
        assert_ne!(result_cache_key("other", &[], &config), base);
        assert_ne!(
            result_cache_key("text", &["prior".to_string()], &config),
            base
        );

        let open = FilterConfig {
            allow_phone: true,
            ..Default::default()
        };
        assert_ne!(result_cache_key("text", &[], &open), base);
    }

    #[test]
    fn test_history_length_distinguishes_same_tail() {
        let config = FilterConfig::default();
        let short: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let long: Vec<String> = vec!["x".into(), "a".into(), "b".into(), "c".into()];
        assert_ne!(
            result_cache_key("text", &short, &config),
            result_cache_key("text", &long, &config)
        );
    }

    #[test]
    fn test_error_results_never_cached() {
        let cache = AiResultCache::new(CacheConfig::default());
        let result = FilterResult::ai_failure();

        cache.store("key", &result);
        assert!(cache.get("key").is_none());
    }

    #[test]
    fn test_allow_and_block_round_trip() {
        let cache = AiResultCache::new(CacheConfig::default());

        let allow = FilterResult::allowed();
        cache.store("allow", &allow);
        assert!(!cache.get("allow").unwrap().blocked);

        let block = FilterResult {
            blocked: true,
            flags: vec![Flag::PhoneNumber],
            reason: "detected a phone number".to_string(),
            filtered_content: None,
        };
        cache.store("block", &block);
        assert!(cache.get("block").unwrap().blocked);
    }
}
