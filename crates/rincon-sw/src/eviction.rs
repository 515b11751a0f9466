//! Entry-count bound per namespace.
//!
//! Oldest entries go first. "Oldest" is whatever order the backend
//! enumerates keys in; [`MemoryCacheStorage`](crate::cache::MemoryCacheStorage)
//! keeps an explicit insertion ledger, other backends may only approximate
//! insertion order.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::config::CacheLimits;
use crate::namespace::{CacheKind, NamespaceManager};

/// Keeps each namespace within its configured entry limit.
#[derive(Clone)]
pub struct EvictionPolicy {
    namespaces: Arc<NamespaceManager>,
    limits: CacheLimits,
}

impl EvictionPolicy {
    /// Create a policy over the current namespaces.
    pub fn new(namespaces: Arc<NamespaceManager>, limits: CacheLimits) -> Self {
        Self { namespaces, limits }
    }

    /// Limit for a kind; `None` is unbounded.
    pub fn limit(&self, kind: CacheKind) -> Option<usize> {
        self.limits.for_kind(kind)
    }

    /// Trim the namespace down to its limit. Returns how many entries were
    /// evicted. A failed single deletion is logged and skipped.
    pub async fn enforce_limit(&self, kind: CacheKind) -> Result<usize, CacheError> {
        let Some(max) = self.limit(kind) else {
            return Ok(0);
        };

        let name = self.namespaces.open(kind).await?;
        let storage = self.namespaces.storage();
        let keys = storage.keys(name).await?;
        if keys.len() <= max {
            return Ok(0);
        }

        let excess = keys.len() - max;
        let mut evicted = 0;
        for key in &keys[..excess] {
            match storage.delete_entry(name, key).await {
                Ok(true) => evicted += 1,
                Ok(false) => debug!(cache = %name, key = %key, "Entry already gone"),
                Err(e) => warn!(cache = %name, key = %key, error = %e, "Failed to evict entry"),
            }
        }

        info!(cache = %name, evicted, max, "Trimmed cache");
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, MemoryCacheStorage};
    use crate::config::WorkerConfig;
    use http::StatusCode;
    use rincon_net::Response;

    async fn fill(storage: &MemoryCacheStorage, name: &str, count: usize) {
        for i in 0..count {
            storage
                .put(name, &format!("https://jeighost.lat/p{i}"), Response::new(StatusCode::OK, "x"))
                .await
                .unwrap();
        }
    }

    fn build_policy(storage: Arc<MemoryCacheStorage>, limits: CacheLimits) -> (EvictionPolicy, Arc<NamespaceManager>) {
        let namespaces = Arc::new(NamespaceManager::new(&WorkerConfig::default(), storage));
        (EvictionPolicy::new(namespaces.clone(), limits), namespaces)
    }

    #[tokio::test]
    async fn test_evicts_oldest_first() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (policy, namespaces) = build_policy(storage.clone(), CacheLimits::default());
        let name = namespaces.name(CacheKind::Images).to_string();

        fill(&storage, &name, 33).await;
        assert_eq!(policy.enforce_limit(CacheKind::Images).await.unwrap(), 3);

        let keys = storage.keys(&name).await.unwrap();
        assert_eq!(keys.len(), 30);
        assert_eq!(keys[0], "https://jeighost.lat/p3");
    }

    #[tokio::test]
    async fn test_under_limit_is_untouched() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (policy, namespaces) = build_policy(storage.clone(), CacheLimits::default());
        let name = namespaces.name(CacheKind::Dynamic).to_string();

        fill(&storage, &name, 50).await;
        assert_eq!(policy.enforce_limit(CacheKind::Dynamic).await.unwrap(), 0);
        assert_eq!(storage.len(&name).await, 50);
    }

    #[tokio::test]
    async fn test_unbounded_kind() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (policy, namespaces) = build_policy(storage.clone(), CacheLimits::default());
        let name = namespaces.name(CacheKind::Static).to_string();

        fill(&storage, &name, 80).await;
        assert_eq!(policy.enforce_limit(CacheKind::Static).await.unwrap(), 0);
        assert_eq!(storage.len(&name).await, 80);
    }

    #[tokio::test]
    async fn test_custom_limit() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let limits = CacheLimits {
            dynamic: Some(2),
            ..Default::default()
        };
        let (policy, namespaces) = build_policy(storage.clone(), limits);
        let name = namespaces.name(CacheKind::Dynamic).to_string();

        fill(&storage, &name, 5).await;
        policy.enforce_limit(CacheKind::Dynamic).await.unwrap();
        assert_eq!(
            storage.keys(&name).await.unwrap(),
            vec!["https://jeighost.lat/p3", "https://jeighost.lat/p4"]
        );
    }
}
