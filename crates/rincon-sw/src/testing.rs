//! Fakes for driving the worker without a browser or a network.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use rincon_net::{cache_key, Fetcher, NetError, Request, Response, Url};

use crate::cache::{CacheBackend, CacheError, MemoryCacheStorage};
use crate::push::{Notification, NotificationHost};
use crate::ServiceWorkerError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Memory storage with switchable failures.
#[derive(Debug, Default)]
pub struct FlakyCacheStorage {
    inner: MemoryCacheStorage,
    failing_deletes: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_listing: AtomicBool,
}

impl FlakyCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deleting the cache `name` fails from now on.
    pub fn fail_delete_of(&self, name: &str) {
        lock(&self.failing_deletes).insert(name.to_string());
    }

    /// Lookups and key listings fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Writes fail with a quota error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Listing cache names fails.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }

    fn check_read(&self) -> Result<(), CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("read failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if lock(&self.failing_deletes).contains(name) {
            return Err(CacheError::Backend(format!("cannot delete {name}")));
        }
        self.inner.delete(name).await
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("listing failed".to_string()));
        }
        self.inner.names().await
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<Response>, CacheError> {
        self.check_read()?;
        self.inner.match_entry(name, key).await
    }

    async fn match_any(&self, key: &str) -> Result<Option<Response>, CacheError> {
        self.check_read()?;
        self.inner.match_any(key).await
    }

    async fn put(&self, name: &str, key: &str, response: Response) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::QuotaExceeded(name.to_string()));
        }
        self.inner.put(name, key, response).await
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>, CacheError> {
        self.check_read()?;
        self.inner.keys(name).await
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool, CacheError> {
        self.inner.delete_entry(name, key).await
    }
}

#[derive(Debug, Clone)]
enum Script {
    Respond(Response),
    Fail,
    Hang,
    Delay(Duration, Response),
}

/// A network answering from a per-URL script.
///
/// Unscripted URLs fail unless a default response is set. Every call is
/// recorded by cache key.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    default_response: Mutex<Option<Response>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

fn normalize(url: &str) -> String {
    Url::parse(url).map(|u| cache_key(&u)).unwrap_or_else(|_| url.to_string())
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, url: &str, script: Script) {
        lock(&self.scripts).insert(normalize(url), script);
    }

    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<Bytes>) {
        self.script(url, Script::Respond(Response::new(status, body)));
    }

    pub fn respond_with(&self, url: &str, response: Response) {
        self.script(url, Script::Respond(response));
    }

    /// Transport failure.
    pub fn fail(&self, url: &str) {
        self.script(url, Script::Fail);
    }

    /// Never completes.
    pub fn hang(&self, url: &str) {
        self.script(url, Script::Hang);
    }

    pub fn delay(&self, url: &str, delay: Duration, response: Response) {
        self.script(url, Script::Delay(delay, response));
    }

    /// Response for every URL without a script.
    pub fn respond_by_default(&self, response: Response) {
        *lock(&self.default_response) = Some(response);
    }

    /// While offline every fetch fails, scripted or not.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let key = normalize(url);
        lock(&self.calls).iter().filter(|c| **c == key).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        lock(&self.calls).push(key.clone());

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(format!("offline: {key}")));
        }

        let script = lock(&self.scripts).get(&key).cloned();
        let script = match script {
            Some(script) => script,
            None => match lock(&self.default_response).clone() {
                Some(response) => Script::Respond(response),
                None => return Err(NetError::RequestFailed(format!("no route for {key}"))),
            },
        };

        match script {
            Script::Respond(response) => Ok(response.with_url(request.url.clone())),
            Script::Fail => Err(NetError::RequestFailed(format!("connection refused: {key}"))),
            Script::Hang => std::future::pending().await,
            Script::Delay(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response.with_url(request.url.clone()))
            }
        }
    }
}

/// Notification host that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingNotificationHost {
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<String>>,
    fail_show: AtomicBool,
}

impl RecordingNotificationHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_show(&self, fail: bool) {
        self.fail_show.store(fail, Ordering::SeqCst);
    }

    pub fn shown(&self) -> Vec<Notification> {
        lock(&self.shown).clone()
    }

    /// Tags passed to `close`, in order.
    pub fn closed(&self) -> Vec<String> {
        lock(&self.closed).clone()
    }
}

#[async_trait]
impl NotificationHost for RecordingNotificationHost {
    async fn show(&self, notification: &Notification) -> Result<(), ServiceWorkerError> {
        if self.fail_show.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Notification("permission denied".to_string()));
        }
        lock(&self.shown).push(notification.clone());
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        lock(&self.closed).push(tag.to_string());
        Ok(())
    }
}
