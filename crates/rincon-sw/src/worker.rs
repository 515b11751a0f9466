//! Lifecycle dispatcher.
//!
//! [`SiteWorker`] owns every component and exposes one method per worker
//! event. The host (a browser shim, the smoke binary, a test) calls them and
//! awaits [`SiteWorker::settle`] before tearing the worker down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use rincon_common::{retry_with_backoff, with_timeout};
use rincon_net::{Fetcher, Request, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cache::{CacheBackend, MemoryCacheStorage};
use crate::classify::{RequestClassifier, Route};
use crate::clients::{ClientHost, WindowClients};
use crate::config::WorkerConfig;
use crate::eviction::EvictionPolicy;
use crate::message::{CacheInfo, ClientMessage};
use crate::namespace::{CacheKind, NamespaceManager, PurgeReport};
use crate::offline::OfflineFallback;
use crate::push::{ClickOutcome, Notification, NotificationHost, PushBridge, TracingNotificationHost};
use crate::strategy::StrategyEngine;
use crate::sync::{refresh_namespace, SyncReport, SYNC_CONTENT_TAG};
use crate::tasks::BackgroundTasks;
use crate::ServiceWorkerError;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Constructed, not installed yet.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed.
    Redundant,
}

/// Worker events observable by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    StateChange(ServiceWorkerState),
    /// Clients were claimed.
    ControllerChange,
}

/// The collaborators a worker runs against.
#[derive(Clone)]
pub struct WorkerHost {
    pub storage: Arc<dyn CacheBackend>,
    pub fetcher: Arc<dyn Fetcher>,
    pub notifications: Arc<dyn NotificationHost>,
    pub clients: Arc<dyn ClientHost>,
}

impl WorkerHost {
    /// In-process storage, logging notifications and an empty client list.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            storage: Arc::new(MemoryCacheStorage::new()),
            fetcher,
            notifications: Arc::new(TracingNotificationHost),
            clients: Arc::new(WindowClients::new()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn CacheBackend>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationHost>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_clients(mut self, clients: Arc<dyn ClientHost>) -> Self {
        self.clients = clients;
        self
    }
}

/// Result of an install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Precache assets stored in the static namespace.
    pub cached: usize,
    /// Precache assets that could not be stored.
    pub failed: Vec<String>,
    /// HTML pages stored in the dynamic namespace.
    pub pages_cached: usize,
    pub pages_failed: Vec<String>,
}

/// What the worker did with a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Respond(Response),
    /// Not intercepted; the host performs the request itself.
    Passthrough,
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }
}

/// Reply channel handed over with a message.
pub type ReplyPort = oneshot::Sender<CacheInfo>;

/// What the worker did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    SkippedWaiting,
    Cleared(PurgeReport),
    CacheInfo(CacheInfo),
    Ignored,
}

/// The service worker: one instance per deployed version.
pub struct SiteWorker {
    config: WorkerConfig,
    origin: Url,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    namespaces: Arc<NamespaceManager>,
    classifier: RequestClassifier,
    engine: StrategyEngine,
    push: PushBridge,
    clients: Arc<dyn ClientHost>,
    tasks: BackgroundTasks,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl SiteWorker {
    /// Validate `config` and wire the components.
    pub fn new(
        config: WorkerConfig,
        host: WorkerHost,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        config.validate()?;
        let origin = config.origin_url()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let namespaces = Arc::new(NamespaceManager::new(&config, host.storage));
        let tasks = BackgroundTasks::new();
        let engine = StrategyEngine::new(
            namespaces.clone(),
            host.fetcher,
            EvictionPolicy::new(namespaces.clone(), config.limits.clone()),
            Arc::new(OfflineFallback::new(namespaces.clone(), &config.offline, &origin)),
            tasks.clone(),
            config.network_timeout(),
        );
        let push = PushBridge::new(
            config.notifications.clone(),
            origin.clone(),
            host.notifications,
            host.clients.clone(),
        );

        let worker = Self {
            classifier: RequestClassifier::from_config(&config, origin.clone()),
            skip_waiting: AtomicBool::new(config.skip_waiting_on_install),
            state: RwLock::new(ServiceWorkerState::Parsed),
            config,
            origin,
            namespaces,
            engine,
            push,
            clients: host.clients,
            tasks,
            event_tx,
        };
        Ok((worker, event_rx))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn namespaces(&self) -> &Arc<NamespaceManager> {
        &self.namespaces
    }

    pub fn push(&self) -> &PushBridge {
        &self.push
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Wait for all background work (refreshes, revalidations).
    pub async fn settle(&self) {
        self.tasks.settle().await
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    async fn transition(
        &self,
        allowed: &[ServiceWorkerState],
        to: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if !allowed.contains(&*state) {
            return Err(ServiceWorkerError::State(format!(
                "Cannot move from {:?} to {to:?}",
                *state
            )));
        }
        *state = to;
        drop(state);

        debug!(state = ?to, "State changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange(to));
        Ok(())
    }

    /// Pre-cache the static manifest and the HTML pages.
    ///
    /// Fails only when the manifest is non-empty and not a single asset
    /// could be cached; the worker is then redundant. On success the worker
    /// is installed, and activates right away if skip-waiting was requested.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let span = info_span!("install", version = %self.config.version);
        self.run_install().instrument(span).await
    }

    async fn run_install(&self) -> Result<InstallReport, ServiceWorkerError> {
        self.transition(&[ServiceWorkerState::Parsed], ServiceWorkerState::Installing)
            .await?;
        info!("Installing");

        let ((cached, failed), (pages_cached, pages_failed)) =
            tokio::join!(self.precache_static(), self.precache_pages());

        let report = InstallReport {
            cached,
            failed,
            pages_cached,
            pages_failed,
        };

        if !self.config.precache.is_empty() && report.cached == 0 {
            self.transition(&[ServiceWorkerState::Installing], ServiceWorkerState::Redundant)
                .await?;
            return Err(ServiceWorkerError::Install(format!(
                "none of {} precache assets could be cached",
                self.config.precache.len()
            )));
        }

        self.transition(&[ServiceWorkerState::Installing], ServiceWorkerState::Installed)
            .await?;
        info!(
            cached = report.cached,
            failed = report.failed.len(),
            pages = report.pages_cached,
            "Installed"
        );

        if self.skip_waiting.load(Ordering::SeqCst) {
            self.activate().await?;
        }
        Ok(report)
    }

    /// Bulk pass first; whatever failed is retried one by one.
    async fn precache_static(&self) -> (usize, Vec<String>) {
        let mut failed = Vec::new();
        if let Err(e) = self.namespaces.open(CacheKind::Static).await {
            warn!(error = %e, "Could not open static cache");
        }

        let requests = self.resolve(&self.config.precache, &mut failed);
        let fetched = join_all(requests.iter().map(|(_, request)| self.fetch_cacheable(request))).await;

        let mut cached = 0;
        let mut retry = Vec::new();
        for ((path, request), result) in requests.iter().zip(fetched) {
            match result {
                Ok(response) => {
                    if self.engine.store(CacheKind::Static, &request.cache_key(), &response).await {
                        cached += 1;
                    } else {
                        failed.push(path.clone());
                    }
                }
                Err(e) => {
                    debug!(asset = %path, error = %e, "Bulk precache miss");
                    retry.push((path, request));
                }
            }
        }

        if !retry.is_empty() {
            warn!(failed = retry.len(), "Bulk precache incomplete, retrying assets one by one");
            let retry_config = self.config.retry_config();
            for (path, request) in retry {
                let stored = match retry_with_backoff(&retry_config, || self.fetch_cacheable(request)).await {
                    Ok(response) => self.engine.store(CacheKind::Static, &request.cache_key(), &response).await,
                    Err(e) => {
                        warn!(asset = %path, error = %e, "Could not precache asset");
                        false
                    }
                };
                if stored {
                    cached += 1;
                } else {
                    failed.push(path.clone());
                }
            }
        }

        (cached, failed)
    }

    /// Best effort; one attempt per page.
    async fn precache_pages(&self) -> (usize, Vec<String>) {
        let mut failed = Vec::new();
        let requests = self.resolve(&self.config.html_pages, &mut failed);
        let fetched = join_all(requests.iter().map(|(_, request)| self.fetch_cacheable(request))).await;

        let mut cached = 0;
        for ((path, request), result) in requests.iter().zip(fetched) {
            let stored = match result {
                Ok(response) => self.engine.store(CacheKind::Dynamic, &request.cache_key(), &response).await,
                Err(e) => {
                    warn!(page = %path, error = %e, "Could not precache page");
                    false
                }
            };
            if stored {
                cached += 1;
            } else {
                failed.push(path.clone());
            }
        }
        (cached, failed)
    }

    fn resolve(&self, paths: &[String], failed: &mut Vec<String>) -> Vec<(String, Request)> {
        paths
            .iter()
            .filter_map(|path| match self.origin.join(path) {
                Ok(url) => Some((path.clone(), Request::get(url))),
                Err(e) => {
                    warn!(path = %path, error = %e, "Unresolvable precache path");
                    failed.push(path.clone());
                    None
                }
            })
            .collect()
    }

    async fn fetch_cacheable(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        let response = with_timeout(self.engine.timeout(), self.engine.fetcher().fetch(request)).await??;
        if !response.is_cacheable() {
            return Err(ServiceWorkerError::Install(format!(
                "{} answered {} ({:?})",
                request.url, response.status, response.response_type
            )));
        }
        Ok(response)
    }

    /// Delete stale namespaces, then claim clients.
    ///
    /// Activating an already active worker is a no-op. Failed deletions are
    /// logged and do not block activation.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let span = info_span!("activate", version = %self.config.version);
        self.run_activate().instrument(span).await
    }

    async fn run_activate(&self) -> Result<(), ServiceWorkerError> {
        if self.state().await == ServiceWorkerState::Activated {
            debug!("Already active");
            return Ok(());
        }
        self.transition(&[ServiceWorkerState::Installed], ServiceWorkerState::Activating)
            .await?;
        info!("Activating");

        match self.namespaces.purge_stale().await {
            Ok(report) => info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Purged stale caches"
            ),
            Err(e) => warn!(error = %e, "Could not list caches for purge"),
        }

        match self.clients.claim().await {
            Ok(()) => {
                let _ = self.event_tx.send(WorkerEvent::ControllerChange);
            }
            Err(e) => warn!(error = %e, "Could not claim clients"),
        }

        self.transition(&[ServiceWorkerState::Activating], ServiceWorkerState::Activated)
            .await?;
        info!("Activated");
        Ok(())
    }

    /// Activate as soon as possible: now if installed, otherwise right
    /// after a successful install.
    pub async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state().await == ServiceWorkerState::Installed {
            self.activate().await?;
        }
        Ok(())
    }

    /// Answer a fetch. Only an active worker intercepts; errors become
    /// responses and never escape.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if self.state().await != ServiceWorkerState::Activated {
            return FetchOutcome::Passthrough;
        }

        let Route::Handle {
            strategy,
            kind,
            navigation,
        } = self.classifier.classify(request)
        else {
            return FetchOutcome::Passthrough;
        };

        let span = info_span!("fetch", url = %request.url, ?strategy, cache = %kind);
        let response = self
            .engine
            .execute(request, strategy, kind, navigation)
            .instrument(span)
            .await;
        FetchOutcome::Respond(response)
    }

    /// Show a notification for a push message.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        self.push.handle_push(data).instrument(info_span!("push")).await
    }

    /// Route a notification click to a page.
    pub async fn handle_notification_click(
        &self,
        notification: &Notification,
        action: &str,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.push
            .handle_click(notification, action)
            .instrument(info_span!("notificationclick", action = %action))
            .await
    }

    /// Handle a posted message. Unknown messages are ignored; a cache info
    /// reply goes to `port` when one is given.
    pub async fn handle_message(
        &self,
        data: &JsonValue,
        port: Option<ReplyPort>,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        self.dispatch_message(data, port).instrument(info_span!("message")).await
    }

    async fn dispatch_message(
        &self,
        data: &JsonValue,
        port: Option<ReplyPort>,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        let Some(message) = ClientMessage::parse(data) else {
            debug!(?data, "Ignoring unknown message");
            return Ok(MessageOutcome::Ignored);
        };

        match message {
            ClientMessage::SkipWaiting => {
                self.skip_waiting().await?;
                Ok(MessageOutcome::SkippedWaiting)
            }
            ClientMessage::ClearCache => {
                let report = self.namespaces.clear_all().await?;
                info!(deleted = report.deleted.len(), "Cleared caches");
                Ok(MessageOutcome::Cleared(report))
            }
            ClientMessage::GetCacheInfo => {
                let info = self.namespaces.cache_info().await?;
                match port {
                    Some(port) => {
                        if port.send(info).is_err() {
                            debug!("Cache info port closed before reply");
                        }
                    }
                    None => debug!("Cache info requested without a reply port"),
                }
                Ok(MessageOutcome::CacheInfo(info))
            }
        }
    }

    /// Handle a background sync. Unknown tags are ignored.
    pub async fn handle_sync(&self, tag: &str) -> Result<Option<SyncReport>, ServiceWorkerError> {
        if tag != SYNC_CONTENT_TAG {
            debug!(tag = %tag, "Ignoring sync tag");
            return Ok(None);
        }
        let report = refresh_namespace(&self.engine, CacheKind::Dynamic)
            .instrument(info_span!("sync", tag = %tag))
            .await?;
        Ok(Some(report))
    }
}
