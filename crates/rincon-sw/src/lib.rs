//! # Rincon Service Worker
//!
//! Offline caching engine for the el-rincon reflections site.
//!
//! ## Features
//!
//! - **Versioned namespaces**: static, dynamic and images caches, purged on
//!   activation when their version goes stale
//! - **Routing**: every GET is classified into cache-first,
//!   network-first or stale-while-revalidate
//! - **Bounded caches**: oldest entries are evicted past a per-kind limit
//! - **Offline fallback**: cached home page or a synthesized offline page
//! - **Push**: payloads become notifications, clicks focus or open pages
//! - **Messages and sync**: skip waiting, clear caches, cache info, content
//!   refresh
//!
//! ## Architecture
//!
//! ```text
//! SiteWorker (one method per worker event)
//!     ├── RequestClassifier ── Route
//!     ├── StrategyEngine
//!     │       ├── Fetcher (network)
//!     │       ├── NamespaceManager ── CacheBackend
//!     │       ├── EvictionPolicy
//!     │       └── OfflineFallback
//!     ├── PushBridge ── NotificationHost, ClientHost
//!     └── BackgroundTasks (work that outlives a response)
//! ```

use rincon_common::TimeoutError;
use rincon_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod eviction;
pub mod message;
pub mod namespace;
pub mod offline;
pub mod push;
pub mod strategy;
pub mod sync;
pub mod tasks;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cache::{CacheBackend, CacheError, MemoryCacheStorage};
pub use classify::{RequestClassifier, Route, Strategy};
pub use clients::{Client, ClientHost, ClientMatchOptions, WindowClients};
pub use config::{ConfigError, WorkerConfig};
pub use message::{CacheInfo, ClientMessage};
pub use namespace::{CacheKind, NamespaceManager, PurgeReport};
pub use push::{ClickOutcome, Notification, NotificationHost, PushBridge, PushPayload};
pub use tasks::BackgroundTasks;
pub use worker::{
    FetchOutcome, InstallReport, MessageOutcome, ReplyPort, ServiceWorkerState, SiteWorker, WorkerEvent,
    WorkerHost,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Install failed: {0}")]
    Install(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Notification error: {0}")]
    Notification(String),
}
