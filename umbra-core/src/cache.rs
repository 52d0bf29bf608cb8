//! Read-through cache for search and fetch results
//!
//! Entries are content-addressed by [`CacheLayer::key_for`] and expire after a
//! per-entry TTL. Callers consult the cache before live work and populate it
//! afterwards; every cache failure degrades to a miss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::CacheConfig;

/// Errors from the cache or its backing store
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("TTL out of range: {0:?}")]
    Ttl(Duration),
}

/// Opaque fingerprint identifying a cached operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A serialized value with its expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// JSON payload
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable backing for the cache (optional)
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Process-local store, mostly useful for tests and single runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Concurrent TTL cache, last writer wins on a key
pub struct CacheLayer {
    entries: DashMap<CacheKey, CacheEntry>,
    store: Option<Arc<dyn PersistentStore>>,
    enabled: bool,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            store: None,
            enabled: config.enabled,
            max_entries: config.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Deterministic fingerprint of an operation and its parameters.
    ///
    /// Parameters are trimmed and sorted, so their order does not matter.
    pub fn key_for(operation: &str, params: &[(&str, &str)]) -> CacheKey {
        let mut pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.trim(), v.trim())).collect();
        pairs.sort_unstable();

        // length-prefixed fields, so no choice of separators can collide
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        field(&mut hasher, operation.trim().as_bytes());
        for (k, v) in pairs {
            field(&mut hasher, k.as_bytes());
            field(&mut hasher, v.as_bytes());
        }
        CacheKey(format!("{:x}", hasher.finalize()))
    }

    /// Look up a value; errors are logged and reported as a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache read for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Store a value; errors are logged and dropped
    pub async fn put<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        if let Err(e) = self.try_put(key, value, ttl).await {
            self.errors.fetch_add(1, Ordering::Relaxed);
            warn!("Cache write for {} failed: {}", key, e);
        }
    }

    pub async fn try_get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, CacheError> {
        if !self.enabled {
            return Ok(None);
        }

        let now = Utc::now();
        let cached = self.entries.get(key).map(|e| e.clone());

        let entry = match cached {
            Some(entry) if !entry.is_expired(now) => Some(entry),
            Some(_) => {
                self.entries.remove_if(key, |_, e| e.is_expired(now));
                None
            }
            None => None,
        };

        let entry = match entry {
            Some(entry) => Some(entry),
            None => self.load_from_store(key, now).await?,
        };

        match entry {
            Some(entry) => {
                let value = serde_json::from_str(&entry.value)?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {}", key);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub async fn try_put<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let created_at = Utc::now();
        let ttl_delta = chrono::Duration::from_std(ttl).map_err(|_| CacheError::Ttl(ttl))?;
        let expires_at = created_at
            .checked_add_signed(ttl_delta)
            .ok_or(CacheError::Ttl(ttl))?;

        let entry = CacheEntry {
            key: key.clone(),
            value: serde_json::to_string(value)?,
            created_at,
            expires_at,
        };

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(key.clone(), entry.clone());

        if let Some(store) = &self.store {
            store.put(entry).await?;
        }
        Ok(())
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn load_from_store(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, CacheError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        match store.get(key).await? {
            Some(entry) if !entry.is_expired(now) => {
                self.entries.insert(key.clone(), entry.clone());
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.created_at)
            .map(|e| e.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::in_memory()
    }
}
