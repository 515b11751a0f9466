//! Versioned cache namespaces.
//!
//! Cache names follow `<prefix>-<kind>-<version>`. Exactly one name per kind
//! is current; any other name under the app prefix is stale.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use rincon_net::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheBackend, CacheError};
use crate::config::WorkerConfig;
use crate::message::CacheInfo;

/// Namespace kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Install-time manifest: shell, styles, scripts, icons.
    Static,
    /// Pages and same-origin resources cached at runtime.
    Dynamic,
    /// Images cached at runtime.
    Images,
}

impl CacheKind {
    /// Every kind, in lookup order.
    pub const ALL: [CacheKind; 3] = [CacheKind::Static, CacheKind::Dynamic, CacheKind::Images];

    /// Label used in cache names.
    pub fn label(&self) -> &'static str {
        match self {
            CacheKind::Static => "static",
            CacheKind::Dynamic => "dynamic",
            CacheKind::Images => "images",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    fn index(&self) -> usize {
        match self {
            CacheKind::Static => 0,
            CacheKind::Dynamic => 1,
            CacheKind::Images => 2,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a purge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Owns the current cache names and their lifecycle.
pub struct NamespaceManager {
    prefix: String,
    names: [String; 3],
    storage: Arc<dyn CacheBackend>,
}

impl NamespaceManager {
    /// Derive the current names from the config.
    pub fn new(config: &WorkerConfig, storage: Arc<dyn CacheBackend>) -> Self {
        let names = CacheKind::ALL.map(|kind| {
            format!("{}-{}-{}", config.app_prefix, kind, config.version_for(kind))
        });
        Self {
            prefix: config.app_prefix.clone(),
            names,
            storage,
        }
    }

    /// Current cache name for a kind.
    pub fn name(&self, kind: CacheKind) -> &str {
        &self.names[kind.index()]
    }

    pub fn storage(&self) -> &Arc<dyn CacheBackend> {
        &self.storage
    }

    /// Open (creating if absent) the current cache for a kind.
    pub async fn open(&self, kind: CacheKind) -> Result<&str, CacheError> {
        let name = self.name(kind);
        self.storage.open(name).await?;
        Ok(name)
    }

    /// Whether a cache name belongs to this app.
    pub fn is_owned(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Whether a name is one of the current namespaces.
    pub fn is_current(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Split an app-owned name into its kind and version.
    pub fn parse_name<'a>(&self, name: &'a str) -> Option<(CacheKind, &'a str)> {
        let rest = name.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?;
        let (label, version) = rest.split_once('-')?;
        Some((CacheKind::from_label(label)?, version))
    }

    /// Delete every app-owned cache that is not current.
    ///
    /// Deletions run concurrently; a failed deletion is logged and does not
    /// stop the others.
    pub async fn purge_stale(&self) -> Result<PurgeReport, CacheError> {
        let stale: Vec<String> = self
            .storage
            .names()
            .await?
            .into_iter()
            .filter(|name| self.is_owned(name) && !self.is_current(name))
            .collect();

        for name in &stale {
            match self.parse_name(name) {
                Some((kind, version)) => debug!(cache = %name, %kind, version, "Stale cache"),
                None => debug!(cache = %name, "Unrecognized app cache"),
            }
        }

        Ok(self.delete_all(stale).await)
    }

    /// Delete every app-owned cache, current ones included.
    pub async fn clear_all(&self) -> Result<PurgeReport, CacheError> {
        let owned: Vec<String> = self
            .storage
            .names()
            .await?
            .into_iter()
            .filter(|name| self.is_owned(name))
            .collect();

        Ok(self.delete_all(owned).await)
    }

    async fn delete_all(&self, names: Vec<String>) -> PurgeReport {
        let results = join_all(names.iter().map(|name| async move {
            info!(cache = %name, "Deleting cache");
            (name, self.storage.delete(name).await)
        }))
        .await;

        let mut report = PurgeReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.deleted.push(name.clone()),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete cache");
                    report.failed.push(name.clone());
                }
            }
        }
        report
    }

    /// Look up a key in the current cache of one kind.
    pub async fn lookup(&self, kind: CacheKind, key: &str) -> Result<Option<Response>, CacheError> {
        self.storage.match_entry(self.name(kind), key).await
    }

    /// Look up a key in every current namespace: static, dynamic, images.
    pub async fn lookup_any(&self, key: &str) -> Result<Option<Response>, CacheError> {
        for kind in CacheKind::ALL {
            if let Some(hit) = self.lookup(kind, key).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Entry counts per current namespace.
    pub async fn cache_info(&self) -> Result<CacheInfo, CacheError> {
        let mut counts = [0usize; 3];
        for kind in CacheKind::ALL {
            counts[kind.index()] = self.storage.keys(self.name(kind)).await?.len();
        }
        debug!(?counts, "Collected cache info");
        Ok(CacheInfo::new(counts[0], counts[1], counts[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::testing::FlakyCacheStorage;
    use http::StatusCode;

    fn manager_with(storage: Arc<dyn CacheBackend>) -> NamespaceManager {
        NamespaceManager::new(&WorkerConfig::default(), storage)
    }

    #[test]
    fn test_names() {
        let manager = manager_with(Arc::new(MemoryCacheStorage::new()));
        assert_eq!(manager.name(CacheKind::Static), "el-rincon-static-v10.0");
        assert_eq!(manager.name(CacheKind::Dynamic), "el-rincon-dynamic-v10.0");
        assert_eq!(manager.name(CacheKind::Images), "el-rincon-images-v10.0");
    }

    #[test]
    fn test_kind_version_override() {
        let mut config = WorkerConfig::default();
        config.kind_versions.images = Some("v2".to_string());
        let manager = NamespaceManager::new(&config, Arc::new(MemoryCacheStorage::new()));
        assert_eq!(manager.name(CacheKind::Images), "el-rincon-images-v2");
        assert_eq!(manager.name(CacheKind::Static), "el-rincon-static-v10.0");
    }

    #[test]
    fn test_ownership_and_parse() {
        let manager = manager_with(Arc::new(MemoryCacheStorage::new()));
        assert!(manager.is_owned("el-rincon-static-v9.0"));
        assert!(!manager.is_owned("el-rinconada-static-v1"));
        assert!(!manager.is_owned("other-app-static-v1"));

        assert_eq!(
            manager.parse_name("el-rincon-images-v9.1"),
            Some((CacheKind::Images, "v9.1"))
        );
        assert_eq!(manager.parse_name("el-rincon-fonts-v1"), None);
        assert_eq!(manager.parse_name("workbox-precache"), None);
    }

    #[tokio::test]
    async fn test_purge_stale_keeps_current_and_foreign() {
        let storage = Arc::new(MemoryCacheStorage::new());
        for name in [
            "el-rincon-static-v9.0",
            "el-rincon-dynamic-v9.0",
            "el-rincon-static-v10.0",
            "third-party-cache",
        ] {
            storage.open(name).await.unwrap();
        }
        let manager = manager_with(storage.clone());

        let report = manager.purge_stale().await.unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert!(report.failed.is_empty());

        let names = storage.names().await.unwrap();
        assert_eq!(names, vec!["el-rincon-static-v10.0", "third-party-cache"]);
    }

    #[tokio::test]
    async fn test_purge_continues_after_failed_delete() {
        let storage = Arc::new(FlakyCacheStorage::new());
        for name in ["el-rincon-static-v8", "el-rincon-static-v9", "el-rincon-images-v9"] {
            storage.open(name).await.unwrap();
        }
        storage.fail_delete_of("el-rincon-static-v9");
        let manager = manager_with(storage.clone());

        let report = manager.purge_stale().await.unwrap();
        assert_eq!(report.failed, vec!["el-rincon-static-v9".to_string()]);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(storage.names().await.unwrap(), vec!["el-rincon-static-v9"]);
    }

    #[tokio::test]
    async fn test_clear_all_and_cache_info() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = manager_with(storage.clone());
        let ok = || Response::new(StatusCode::OK, "x");

        storage.put(manager.name(CacheKind::Static), "a", ok()).await.unwrap();
        storage.put(manager.name(CacheKind::Dynamic), "b", ok()).await.unwrap();
        storage.put(manager.name(CacheKind::Dynamic), "c", ok()).await.unwrap();
        storage.put("foreign", "d", ok()).await.unwrap();

        let info = manager.cache_info().await.unwrap();
        assert_eq!((info.static_entries, info.dynamic, info.images, info.total), (1, 2, 0, 3));

        let report = manager.clear_all().await.unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(storage.names().await.unwrap(), vec!["foreign"]);
    }

    #[tokio::test]
    async fn test_lookup_any_searches_current_namespaces() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let manager = manager_with(storage.clone());
        storage
            .put(manager.name(CacheKind::Dynamic), "k", Response::new(StatusCode::OK, "dyn"))
            .await
            .unwrap();
        storage
            .put("el-rincon-static-v1", "stale", Response::new(StatusCode::OK, "old"))
            .await
            .unwrap();

        assert!(manager.lookup_any("k").await.unwrap().is_some());
        assert!(manager.lookup_any("stale").await.unwrap().is_none());
    }
}
