//! # Rate Limiter
//!
//! Fixed-window counting per caller identifier (credential id when
//! authenticated, source IP otherwise). A bounded local window cache
//! answers most checks without touching the distributed store:
//!
//! - local window **miss**: the authoritative INCR runs synchronously and
//!   seeds the local window with the cross-process count
//! - local window **hit**: the local counter is bumped optimistically and
//!   the INCR is fired off in the background
//!
//! Over-limit callers get the remaining window seconds back for the
//! `Retry-After` header. Store failures degrade to local-only counting;
//! availability wins over strictness.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::store::CounterStore;

/// How many identifier windows the local cache tracks.
const LOCAL_WINDOW_CAPACITY: usize = 16_384;

/// Limit and window for one route class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Requests allowed per window
    pub limit: u64,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured window limit
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the window resets
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    window_id: u64,
    count: u64,
}

/// Fixed-window rate limiter with an optimistic local cache.
pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    defaults: RateLimitSettings,
    local: Mutex<LruCache<String, LocalWindow>>,
}

impl FixedWindowLimiter {
    /// Build a limiter over the given counter store.
    pub fn new(store: Arc<dyn CounterStore>, defaults: RateLimitSettings) -> Self {
        Self {
            store,
            defaults,
            local: Mutex::new(LruCache::new(
                NonZeroUsize::new(LOCAL_WINDOW_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    /// Check one request against the default settings.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_with(identifier, self.defaults).await
    }

    /// Check one request against route-specific settings.
    pub async fn check_with(
        &self,
        identifier: &str,
        settings: RateLimitSettings,
    ) -> RateLimitDecision {
        let window_secs = settings.window.as_secs().max(1);
        let now = epoch_secs();
        let window_id = now / window_secs;
        let retry_after_secs = window_secs - (now % window_secs);
        let store_key = format!("ratelimit:{}:{}", identifier, window_id);

        let local_count = {
            let mut local = self.local.lock();
            match local.get_mut(identifier) {
                Some(window) if window.window_id == window_id => {
                    window.count += 1;
                    Some(window.count)
                }
                _ => None,
            }
        };

        let count = match local_count {
            Some(count) => {
                // Local hit: reconcile the shared counter off the hot path.
                let store = Arc::clone(&self.store);
                let ttl = settings.window;
                tokio::spawn(async move {
                    if let Err(e) = store.incr_by(&store_key, 1).await {
                        log::debug!("background rate-limit INCR failed: {}", e);
                    } else if let Err(e) = store.expire(&store_key, ttl * 2).await {
                        log::debug!("background rate-limit EXPIRE failed: {}", e);
                    }
                });
                count
            }
            None => {
                // Local miss: the shared counter is authoritative.
                let count = match self.store.incr_by(&store_key, 1).await {
                    Ok(count) => {
                        if let Err(e) = self.store.expire(&store_key, settings.window * 2).await {
                            log::debug!("rate-limit EXPIRE failed: {}", e);
                        }
                        count.max(1) as u64
                    }
                    Err(e) => {
                        log::warn!("rate-limit store unavailable, counting locally: {}", e);
                        1
                    }
                };

                self.local.lock().put(
                    identifier.to_string(),
                    LocalWindow { window_id, count },
                );
                count
            }
        };

        RateLimitDecision {
            allowed: count <= settings.limit,
            limit: settings.limit,
            remaining: settings.limit.saturating_sub(count),
            retry_after_secs,
        }
    }

    /// Forget an identifier's local window (used by tests and revocation).
    pub fn reset_local(&self, identifier: &str) {
        self.local.lock().pop(identifier);
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;

    fn limiter(limit: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitSettings {
                limit,
                window: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_allows_up_to_limit() {
        let limiter = limiter(5);

        for i in 0..5 {
            let decision = limiter.check("caller").await;
            assert!(decision.allowed, "request {} should pass", i);
        }

        let decision = limiter.check("caller").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs > 0);
        assert!(decision.retry_after_secs <= 60);
    }

    #[tokio::test]
    async fn test_hundred_and_first_rejected() {
        let limiter = limiter(100);

        for _ in 0..100 {
            assert!(limiter.check("ip-1").await.allowed);
        }

        let decision = limiter.check("ip-1").await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let limiter = limiter(2);

        assert!(limiter.check("a").await.allowed);
        assert!(limiter.check("a").await.allowed);
        assert!(!limiter.check("a").await.allowed);

        assert!(limiter.check("b").await.allowed);
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = limiter(3);

        assert_eq!(limiter.check("c").await.remaining, 2);
        assert_eq!(limiter.check("c").await.remaining, 1);
        assert_eq!(limiter.check("c").await.remaining, 0);
        assert!(!limiter.check("c").await.allowed);
    }

    #[tokio::test]
    async fn test_route_settings_override_defaults() {
        let limiter = limiter(100);
        let strict = RateLimitSettings {
            limit: 1,
            window: Duration::from_secs(60),
        };

        assert!(limiter.check_with("d", strict).await.allowed);
        assert!(!limiter.check_with("d", strict).await.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_still_allows() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl CounterStore for FailingStore {
            async fn ping(&self) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn incr_by(&self, _: &str, _: i64) -> crate::store::Result<i64> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn expire(&self, _: &str, _: Duration) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn get(&self, _: &str) -> crate::store::Result<Option<String>> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn set(
                &self,
                _: &str,
                _: &str,
                _: Option<Duration>,
            ) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn delete(&self, _: &str) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn mget(&self, _: &[String]) -> crate::store::Result<Vec<Option<String>>> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn hincr_by(&self, _: &str, _: &str, _: i64) -> crate::store::Result<i64> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn hgetall(
                &self,
                _: &str,
            ) -> crate::store::Result<std::collections::HashMap<String, String>> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn hset_multiple(
                &self,
                _: &str,
                _: &[(String, String)],
            ) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn lpush(&self, _: &str, _: &str) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn ltrim(&self, _: &str, _: i64, _: i64) -> crate::store::Result<()> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn lrange(
                &self,
                _: &str,
                _: i64,
                _: i64,
            ) -> crate::store::Result<Vec<String>> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
            async fn scan_match(&self, _: &str) -> crate::store::Result<Vec<String>> {
                Err(crate::store::StoreError::Unavailable("down".into()))
            }
        }

        let limiter = FixedWindowLimiter::new(
            Arc::new(FailingStore),
            RateLimitSettings {
                limit: 2,
                window: Duration::from_secs(60),
            },
        );

        assert!(limiter.check("e").await.allowed);
        assert!(limiter.check("e").await.allowed);
        assert!(!limiter.check("e").await.allowed);
    }
}
