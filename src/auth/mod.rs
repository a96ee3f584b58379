//! # Credentials
//!
//! API keys are created on first contact from an IP, validated on every
//! request, and revocable. Lookups go through two cache tiers before the
//! database:
//!
//! 1. in-process cache (sub-millisecond, 2–5 minute TTL)
//! 2. distributed store (shared across instances, longer TTL)
//!
//! Both tiers hold independent entries for lookup-by-key and lookup-by-IP,
//! and both are invalidated on revocation. A revoked key may still be seen
//! for at most the in-process TTL on other instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cache::MemoryCache;
use crate::db::Database;
use crate::store::CounterStore;

/// Auth error types
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential for the presented key
    #[error("unknown API key")]
    NotFound,

    /// Credential exists but was revoked
    #[error("API key revoked")]
    Revoked,

    /// Persistence failure
    #[error("credential storage error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Auth result alias
pub type Result<T> = std::result::Result<T, AuthError>;

/// A caller credential.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    /// Row id
    pub id: i64,
    /// 64-character hex API key, unique
    pub key: String,
    /// Source IP the key was issued to, unique
    pub ip: String,
    /// Deterministic caller id derived from the IP
    pub user_id: String,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// Last successful validation
    pub last_used_at: DateTime<Utc>,
    /// False once revoked
    pub is_active: bool,
}

/// Deterministic caller id for an IP: a short prefix of its SHA-256.
pub fn caller_id_for_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    format!("u{}", hex::encode(&digest[..8]))
}

/// Generate a fresh 64-character hex API key.
fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// Service
// ============================================================================

/// Credential issuing, validation and revocation with two cache tiers.
pub struct CredentialService {
    db: Database,
    store: Arc<dyn CounterStore>,
    local: MemoryCache,
    local_ttl: Duration,
    store_ttl: Duration,
}

impl CredentialService {
    /// Build the service over the database and distributed store.
    pub fn new(db: Database, store: Arc<dyn CounterStore>, local: MemoryCache) -> Self {
        Self {
            db,
            store,
            local,
            local_ttl: Duration::from_secs(180),
            store_ttl: Duration::from_secs(900),
        }
    }

    /// Override cache tier TTLs.
    pub fn with_ttls(mut self, local_ttl: Duration, store_ttl: Duration) -> Self {
        self.local_ttl = local_ttl;
        self.store_ttl = store_ttl;
        self
    }

    /// Statistics of the in-process cache tier.
    pub fn local_cache_stats(&self) -> crate::cache::CacheStats {
        self.local.stats()
    }

    /// Return the credential for an IP, creating one on first contact.
    pub async fn get_or_create(&self, ip: &str) -> Result<Credential> {
        if let Some(credential) = self.cached(&ip_cache_key(ip)).await {
            if credential.is_active {
                return Ok(credential);
            }
        }

        let existing: Option<Credential> =
            sqlx::query_as("SELECT * FROM credentials WHERE ip = $1")
                .bind(ip)
                .fetch_optional(self.db.pool())
                .await?;

        if let Some(credential) = existing {
            if credential.is_active {
                self.fill_caches(&credential).await;
            }
            return Ok(credential);
        }

        let now = Utc::now();
        let credential = Credential {
            id: 0,
            key: generate_key(),
            ip: ip.to_string(),
            user_id: caller_id_for_ip(ip),
            created_at: now,
            last_used_at: now,
            is_active: true,
        };

        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO credentials (key, ip, user_id, created_at, last_used_at, is_active)
            VALUES ($1, $2, $3, $4, $5, 1)
            RETURNING id
            ",
        )
        .bind(&credential.key)
        .bind(&credential.ip)
        .bind(&credential.user_id)
        .bind(credential.created_at)
        .bind(credential.last_used_at)
        .fetch_one(self.db.pool())
        .await?;

        let credential = Credential {
            id: row.0,
            ..credential
        };
        log::info!("issued credential {} for caller {}", credential.id, credential.user_id);
        self.fill_caches(&credential).await;

        Ok(credential)
    }

    /// Validate an API key, refreshing `last_used_at`.
    pub async fn validate(&self, key: &str) -> Result<Credential> {
        if let Some(credential) = self.cached(&key_cache_key(key)).await {
            if credential.is_active {
                return Ok(credential);
            }
            return Err(AuthError::Revoked);
        }

        let credential: Option<Credential> =
            sqlx::query_as("SELECT * FROM credentials WHERE key = $1")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;

        let mut credential = credential.ok_or(AuthError::NotFound)?;
        if !credential.is_active {
            return Err(AuthError::Revoked);
        }

        credential.last_used_at = Utc::now();
        sqlx::query("UPDATE credentials SET last_used_at = $1 WHERE id = $2")
            .bind(credential.last_used_at)
            .bind(credential.id)
            .execute(self.db.pool())
            .await?;

        self.fill_caches(&credential).await;
        Ok(credential)
    }

    /// Revoke a key. Invalidates every cache tier for both the key and the
    /// IP entry. Returns false when the key does not exist.
    pub async fn revoke(&self, key: &str) -> Result<bool> {
        let credential: Option<Credential> =
            sqlx::query_as("SELECT * FROM credentials WHERE key = $1")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;

        let credential = match credential {
            Some(credential) => credential,
            None => return Ok(false),
        };

        sqlx::query("UPDATE credentials SET is_active = 0 WHERE id = $1")
            .bind(credential.id)
            .execute(self.db.pool())
            .await?;

        self.local.remove(&key_cache_key(&credential.key));
        self.local.remove(&ip_cache_key(&credential.ip));

        for store_key in [
            store_key_for_key(&credential.key),
            store_key_for_ip(&credential.ip),
        ] {
            if let Err(e) = self.store.delete(&store_key).await {
                log::warn!("credential cache invalidation failed for {}: {}", store_key, e);
            }
        }

        log::info!("revoked credential {} for caller {}", credential.id, credential.user_id);
        Ok(true)
    }

    /// Two-tier cache lookup: in-process, then distributed (promoting to
    /// in-process on hit).
    async fn cached(&self, local_key: &str) -> Option<Credential> {
        if let Some(credential) = self.local.get::<Credential>(local_key) {
            return Some(credential);
        }

        let store_key = format!("auth:{}", local_key);
        match self.store.get(&store_key).await {
            Ok(Some(json)) => match serde_json::from_str::<Credential>(&json) {
                Ok(credential) => {
                    let _ = self
                        .local
                        .set(local_key, &credential, Some(self.local_ttl));
                    Some(credential)
                }
                Err(e) => {
                    log::warn!("dropping corrupt distributed credential entry: {}", e);
                    let _ = self.store.delete(&store_key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::debug!("distributed credential lookup failed: {}", e);
                None
            }
        }
    }

    async fn fill_caches(&self, credential: &Credential) {
        for local_key in [
            key_cache_key(&credential.key),
            ip_cache_key(&credential.ip),
        ] {
            let _ = self.local.set(&local_key, credential, Some(self.local_ttl));

            if let Ok(json) = serde_json::to_string(credential) {
                let store_key = format!("auth:{}", local_key);
                if let Err(e) = self
                    .store
                    .set(&store_key, &json, Some(self.store_ttl))
                    .await
                {
                    log::debug!("distributed credential cache fill failed: {}", e);
                }
            }
        }
    }
}

fn key_cache_key(key: &str) -> String {
    format!("key:{}", key)
}

fn ip_cache_key(ip: &str) -> String {
    format!("ip:{}", ip)
}

fn store_key_for_key(key: &str) -> String {
    format!("auth:key:{}", key)
}

fn store_key_for_ip(ip: &str) -> String {
    format!("auth:ip:{}", ip)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::store::MemoryCounterStore;

    async fn service() -> CredentialService {
        let db = Database::connect_in_memory().await.unwrap();
        let store = Arc::new(MemoryCounterStore::new());
        let cache = MemoryCache::new(CacheConfig {
            name: "credential-cache-test".to_string(),
            ..Default::default()
        });
        CredentialService::new(db, store, cache)
    }

    #[test]
    fn test_caller_id_deterministic() {
        assert_eq!(caller_id_for_ip("10.0.0.1"), caller_id_for_ip("10.0.0.1"));
        assert_ne!(caller_id_for_ip("10.0.0.1"), caller_id_for_ip("10.0.0.2"));
        assert!(caller_id_for_ip("10.0.0.1").starts_with('u'));
    }

    #[test]
    fn test_generated_key_shape() {
        let key = generate_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_key());
    }

    #[tokio::test]
    async fn test_create_then_reuse_for_same_ip() {
        let service = service().await;

        let first = service.get_or_create("10.1.1.1").await.unwrap();
        let second = service.get_or_create("10.1.1.1").await.unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(first.user_id, second.user_id);
    }

    #[tokio::test]
    async fn test_validate_known_key() {
        let service = service().await;

        let credential = service.get_or_create("10.1.1.2").await.unwrap();
        let validated = service.validate(&credential.key).await.unwrap();

        assert_eq!(validated.user_id, credential.user_id);
        assert!(validated.is_active);
    }

    #[tokio::test]
    async fn test_validate_unknown_key() {
        let service = service().await;
        let result = service.validate(&"0".repeat(64)).await;
        assert!(matches!(result, Err(AuthError::NotFound)));
    }

    #[tokio::test]
    async fn test_revoke_invalidates_caches() {
        let service = service().await;

        let credential = service.get_or_create("10.1.1.3").await.unwrap();
        assert!(service.validate(&credential.key).await.is_ok());

        assert!(service.revoke(&credential.key).await.unwrap());

        let result = service.validate(&credential.key).await;
        assert!(matches!(result, Err(AuthError::Revoked)));
    }

    #[tokio::test]
    async fn test_revoke_unknown_key_is_false() {
        let service = service().await;
        assert!(!service.revoke("does-not-exist").await.unwrap());
    }

    #[tokio::test]
    async fn test_distributed_tier_promotes_to_local() {
        let db = Database::connect_in_memory().await.unwrap();
        let store: Arc<MemoryCounterStore> = Arc::new(MemoryCounterStore::new());
        let cache = MemoryCache::new(CacheConfig::default());
        let service = CredentialService::new(db, Arc::clone(&store) as Arc<dyn CounterStore>, cache);

        let credential = service.get_or_create("10.1.1.4").await.unwrap();

        // Simulate a fresh process: local tier empty, distributed tier warm.
        service.local.clear();
        let validated = service.validate(&credential.key).await.unwrap();
        assert_eq!(validated.key, credential.key);
    }
}
