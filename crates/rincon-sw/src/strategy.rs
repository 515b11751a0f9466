//! Fetch strategies.
//!
//! Every strategy runs against one namespace. Writes go through
//! [`StrategyEngine::store`], the single place that enforces the
//! cacheability rule (200, not opaque) and the eviction bound. Work that may
//! finish after the response is handed to [`BackgroundTasks`].

use std::sync::Arc;
use std::time::Duration;

use rincon_common::with_timeout;
use rincon_net::{Fetcher, Request, Response};
use tracing::{debug, warn};

use crate::classify::Strategy;
use crate::eviction::EvictionPolicy;
use crate::namespace::{CacheKind, NamespaceManager};
use crate::offline::OfflineFallback;
use crate::tasks::BackgroundTasks;
use crate::ServiceWorkerError;

/// Runs a caching strategy for a classified request.
#[derive(Clone)]
pub struct StrategyEngine {
    namespaces: Arc<NamespaceManager>,
    fetcher: Arc<dyn Fetcher>,
    eviction: EvictionPolicy,
    offline: Arc<OfflineFallback>,
    tasks: BackgroundTasks,
    timeout: Duration,
}

impl StrategyEngine {
    /// Create an engine over the given namespaces and network.
    pub fn new(
        namespaces: Arc<NamespaceManager>,
        fetcher: Arc<dyn Fetcher>,
        eviction: EvictionPolicy,
        offline: Arc<OfflineFallback>,
        tasks: BackgroundTasks,
        timeout: Duration,
    ) -> Self {
        Self {
            namespaces,
            fetcher,
            eviction,
            offline,
            tasks,
            timeout,
        }
    }

    pub fn namespaces(&self) -> &Arc<NamespaceManager> {
        &self.namespaces
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a strategy and turn any failure into a response.
    ///
    /// `navigation` only matters for network-first, the one strategy that
    /// answers with the offline page; the others answer 503.
    pub async fn execute(
        &self,
        request: &Request,
        strategy: Strategy,
        kind: CacheKind,
        navigation: bool,
    ) -> Response {
        match strategy {
            Strategy::CacheFirst => match self.cache_first(request, kind).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Cache-first failed");
                    Response::unavailable()
                }
            },
            Strategy::NetworkFirst => self.network_first(request, kind, navigation).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, kind).await,
        }
    }

    /// Write a response if it is cacheable, then trim the namespace.
    ///
    /// Returns whether the response was stored. Failures are logged, never
    /// returned: a failed write must not fail the fetch that produced it.
    pub async fn store(&self, kind: CacheKind, key: &str, response: &Response) -> bool {
        if !response.is_cacheable() {
            debug!(
                key = %key,
                status = %response.status,
                response_type = ?response.response_type,
                "Not caching response"
            );
            return false;
        }

        let name = self.namespaces.name(kind);
        if let Err(e) = self.namespaces.storage().put(name, key, response.clone()).await {
            warn!(cache = %name, key = %key, error = %e, "Cache write failed");
            return false;
        }

        if let Err(e) = self.eviction.enforce_limit(kind).await {
            warn!(cache = %name, error = %e, "Eviction failed");
        }
        true
    }

    /// Serve from cache and refresh in the background; on a miss, fetch,
    /// store and return. Network errors on a miss are returned to the caller.
    pub async fn cache_first(&self, request: &Request, kind: CacheKind) -> Result<Response, ServiceWorkerError> {
        let key = request.cache_key();

        match self.namespaces.lookup(kind, &key).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url, cache = %kind, "Cache hit");
                self.refresh_in_background(request, kind);
                return Ok(cached);
            }
            Ok(None) => debug!(url = %request.url, cache = %kind, "Cache miss"),
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, going to network"),
        }

        let response = self.fetcher.fetch(request).await?;
        self.store(kind, &key, &response).await;
        Ok(response)
    }

    fn refresh_in_background(&self, request: &Request, kind: CacheKind) {
        let engine = self.clone();
        let request = request.refetch();
        self.tasks.wait_until("refresh", async move {
            match engine.fetcher.fetch(&request).await {
                Ok(response) => {
                    engine.store(kind, &request.cache_key(), &response).await;
                }
                Err(e) => debug!(url = %request.url, error = %e, "Background refresh discarded"),
            }
        });
    }

    /// Race the network against the deadline; fall back to the caches, then
    /// to the offline page (navigations) or a 503.
    ///
    /// Navigation HTML is never written: a cached page could go stale
    /// without the user noticing.
    pub async fn network_first(&self, request: &Request, kind: CacheKind, navigation: bool) -> Response {
        let key = request.cache_key();

        match with_timeout(self.timeout, self.fetcher.fetch(request)).await {
            Ok(Ok(response)) => {
                if !navigation {
                    self.store(kind, &key, &response).await;
                }
                return response;
            }
            Ok(Err(e)) => debug!(url = %request.url, error = %e, "Network failed, trying cache"),
            Err(e) => warn!(url = %request.url, error = %e, "Network timed out, trying cache"),
        }

        if let Some(cached) = self.cache_fallback(kind, &key).await {
            return cached;
        }

        if navigation {
            self.offline.build_offline_response(request).await
        } else {
            Response::unavailable()
        }
    }

    async fn cache_fallback(&self, kind: CacheKind, key: &str) -> Option<Response> {
        match self.namespaces.lookup(kind, key).await {
            Ok(Some(hit)) => return Some(hit),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache fallback lookup failed"),
        }
        match self.namespaces.lookup_any(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache fallback lookup failed");
                None
            }
        }
    }

    /// Start the network fetch right away; answer from cache if possible and
    /// let the fetch update the cache in the background.
    pub async fn stale_while_revalidate(&self, request: &Request, kind: CacheKind) -> Response {
        let key = request.cache_key();

        let engine = self.clone();
        let refetch = request.refetch();
        let network = tokio::spawn(async move {
            let response = engine.fetcher.fetch(&refetch).await?;
            engine.store(kind, &refetch.cache_key(), &response).await;
            Ok::<_, rincon_net::NetError>(response)
        });

        let cached = match self.namespaces.lookup(kind, &key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed");
                None
            }
        };

        if let Some(cached) = cached {
            debug!(url = %request.url, "Serving stale entry while revalidating");
            let url = request.url.clone();
            self.tasks.wait_until("revalidate", async move {
                match network.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => debug!(url = %url, error = %e, "Revalidation discarded"),
                    Err(e) => warn!(url = %url, error = %e, "Revalidation task failed"),
                }
            });
            return cached;
        }

        match network.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!(url = %request.url, error = %e, "Network failed with nothing cached");
                Response::unavailable()
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network task failed");
                Response::unavailable()
            }
        }
    }
}
