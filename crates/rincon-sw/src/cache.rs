//! Cache storage.
//!
//! [`CacheBackend`] is the worker's view of `caches`: named caches holding
//! key → response snapshots. [`MemoryCacheStorage`] is the in-process
//! implementation; every cache keeps an explicit insertion ledger so key
//! enumeration is oldest-first, which the eviction policy relies on.

use async_trait::async_trait;
use hashbrown::HashMap;
use rincon_net::Response;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by a cache backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Quota exceeded writing to {0}")]
    QuotaExceeded(String),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized request URL.
    pub key: String,
    /// Response snapshot.
    pub response: Response,
    /// Position in the insertion ledger; lower is older.
    seq: u64,
}

/// A named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
    created: u64,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Look up a key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store a response. Overwriting a key moves it to the newest position.
    pub fn put(&mut self, key: &str, response: Response) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                response,
                seq,
            },
        );
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, oldest first.
    pub fn keys(&self) -> Vec<&str> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.key.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Asynchronous cache storage, shaped like the browser's `caches` global.
///
/// Operations are atomic per key; nothing else is guaranteed between calls.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Create the cache if it does not exist.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Cache names in creation order.
    async fn names(&self) -> Result<Vec<String>, CacheError>;

    /// Look up a key in one cache. A missing cache is a miss.
    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError>;

    /// Look up a key across all caches, in creation order.
    async fn match_any(&self, key: &str) -> Result<Option<Response>, CacheError>;

    /// Store a response, creating the cache on first write.
    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), CacheError>;

    /// Keys of one cache, oldest first. A missing cache has no keys.
    async fn keys(&self, name: &str) -> Result<Vec<String>, CacheError>;

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, CacheError>;
}

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Cache>,
    next_cache: u64,
}

impl StorageInner {
    fn open(&mut self, name: &str) -> &mut Cache {
        let next = &mut self.next_cache;
        self.caches.entry(name.to_string()).or_insert_with(|| {
            let mut cache = Cache::new(name);
            cache.created = *next;
            *next += 1;
            cache
        })
    }

    fn ordered(&self) -> Vec<&Cache> {
        let mut caches: Vec<&Cache> = self.caches.values().collect();
        caches.sort_by_key(|c| c.created);
        caches
    }
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    inner: RwLock<StorageInner>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a cache, zero if it does not exist.
    pub async fn len(&self, name: &str) -> usize {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .map(Cache::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.write().await.open(name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.inner.write().await.caches.remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .inner
            .read()
            .await
            .ordered()
            .into_iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError> {
        Ok(self
            .inner
            .read()
            .await
            .caches
            .get(name)
            .and_then(|c| c.match_request(key))
            .map(|e| e.response.clone()))
    }

    async fn match_any(&self, key: &str) -> Result<Option<Response>, CacheError> {
        let inner = self.inner.read().await;
        Ok(inner
            .ordered()
            .into_iter()
            .find_map(|c| c.match_request(key))
            .map(|e| e.response.clone()))
    }

    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), CacheError> {
        self.inner.write().await.open(name).put(key, response);
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .inner
            .read()
            .await
            .caches
            .get(name)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default())
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .inner
            .write()
            .await
            .caches
            .get_mut(name)
            .map(|c| c.delete(key))
            .unwrap_or(false))
    }
}
