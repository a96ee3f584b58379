//! # Distributed Counter Store
//!
//! A thin contract over the key/value store that holds cross-process
//! counters, recent latency samples and the distributed credential cache.
//! Only atomic primitives are exposed: INCR, HINCRBY, LPUSH + LTRIM, MGET,
//! SET/GET with TTL, and pattern scan.
//!
//! Two implementations:
//!
//! - [`RedisCounterStore`] — production, backed by a
//!   `redis::aio::ConnectionManager`
//! - [`MemoryCounterStore`] — in-process fallback used by tests and when no
//!   store is reachable at startup

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::RwLock as TokioRwLock;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis error
    #[error("Store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Store result alias
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Contract
// ============================================================================

/// Atomic operations against the distributed counter store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Atomically add `amount` to an integer key, returning the new value.
    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64>;

    /// Set a TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Read one key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write one key, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete one key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read several keys in one round trip.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Atomically add `amount` to a hash field, returning the new value.
    async fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64>;

    /// Read all fields of a hash.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Overwrite several hash fields.
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Push a value to the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Trim a list to the inclusive index range.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Read an inclusive index range of a list.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Enumerate keys matching a glob pattern. Not for hot paths.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;
}

// ============================================================================
// Redis implementation
// ============================================================================

/// Redis-backed counter store.
pub struct RedisCounterStore {
    conn: Arc<TokioRwLock<ConnectionManager>>,
}

impl RedisCounterStore {
    /// Connect to Redis and build the store.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(TokioRwLock::new(conn)),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.write().await;
        redis::cmd("PING").query_async::<_, String>(&mut *conn).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn.write().await;
        let value = redis::cmd("INCRBY")
            .arg(key)
            .arg(amount)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.write().await;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<_, i64>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.write().await;
        let value = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.write().await;
        match ttl {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async::<_, ()>(&mut *conn)
                    .await?;
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<_, ()>(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.write().await;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.write().await;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values = cmd.query_async(&mut *conn).await?;
        Ok(values)
    }

    async fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn.write().await;
        let value = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(amount)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.write().await;
        let value = redis::cmd("HGETALL").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.write().await;
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<_, i64>(&mut *conn).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.write().await;
        redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async::<_, i64>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.conn.write().await;
        redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.write().await;
        let values = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut *conn)
            .await?;
        Ok(values)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.write().await;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;

            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-process counter store for tests and degraded startup.
#[derive(Default)]
pub struct MemoryCounterStore {
    values: DashMap<String, (String, Option<Instant>)>,
    hashes: DashMap<String, HashMap<String, String>>,
    lists: DashMap<String, Vec<String>>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let expired = match self.values.get(key) {
            Some(entry) => match entry.1 {
                Some(expiry) => Instant::now() >= expiry,
                None => false,
            },
            None => return None,
        };

        if expired {
            self.values.remove(key);
            return None;
        }

        self.values.get(key).map(|e| e.0.clone())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let current: i64 = self
            .live_value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + amount;
        let expiry = self.values.get(key).and_then(|e| e.1);
        self.values.insert(key.to_string(), (next.to_string(), expiry));
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.values.get_mut(key) {
            entry.1 = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expiry = ttl.map(|d| Instant::now() + d);
        self.values.insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.hashes.remove(key);
        self.lists.remove(key);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        Ok(keys.iter().map(|k| self.live_value(k)).collect())
    }

    async fn hincr_by(&self, key: &str, field: &str, amount: i64) -> Result<i64> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + amount;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        if let Some(mut list) = self.lists.get_mut(key) {
            let len = list.len() as i64;
            let start = normalize_index(start, len).max(0);
            let stop = normalize_index(stop, len).min(len - 1);
            if start > stop || len == 0 {
                list.clear();
            } else {
                *list = list[start as usize..=(stop as usize)].to_vec();
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let list = match self.lists.get(key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as i64;
        let start = normalize_index(start, len).max(0);
        let stop = normalize_index(stop, len).min(len - 1);
        if len == 0 || start > stop {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..=(stop as usize)].to_vec())
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .iter()
            .map(|e| e.key().clone())
            .chain(self.hashes.iter().map(|e| e.key().clone()))
            .chain(self.lists.iter().map(|e| e.key().clone()))
            .filter(|k| glob_match(pattern, k))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Redis-style negative index handling.
fn normalize_index(index: i64, len: i64) -> i64 {
    if index < 0 {
        len + index
    } else {
        index
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for the key
/// patterns this service scans (`stats:requests:user:*` and the like).
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }

    true
}

// ============================================================================
// Tests
// ============================================================================
