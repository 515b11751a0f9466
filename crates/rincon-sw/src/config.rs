//! Worker configuration.
//!
//! Every knob the worker needs at construction time: cache naming, the
//! precache manifest supplied by the deploy, eviction limits, the network
//! deadline and presentation defaults. Loaded from JSON; any field left out
//! falls back to its default.

use std::path::Path;
use std::time::Duration;

use rincon_common::RetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::namespace::CacheKind;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix shared by every cache this app owns.
    pub app_prefix: String,

    /// Build version, used for every namespace without an override.
    pub version: String,

    /// Per-kind version overrides.
    pub kind_versions: KindVersions,

    /// Origin the worker is registered at.
    pub origin: String,

    /// Paths pre-cached into the static namespace at install.
    pub precache: Vec<String>,

    /// HTML pages pre-cached into the dynamic namespace at install.
    pub html_pages: Vec<String>,

    /// Maximum entries per namespace.
    pub limits: CacheLimits,

    /// Deadline for network-first fetches, in milliseconds.
    pub network_timeout_ms: u64,

    /// Third-party font hosts treated as static assets.
    pub font_hosts: Vec<String>,

    /// Activate right after a successful install.
    pub skip_waiting_on_install: bool,

    /// Retry policy for precache assets that failed the bulk pass.
    pub precache_retry: PrecacheRetry,

    /// Texts of the synthesized offline page.
    pub offline: OfflinePageConfig,

    /// Defaults for push notifications.
    pub notifications: NotificationDefaults,
}

/// Per-kind version overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindVersions {
    #[serde(rename = "static")]
    pub static_assets: Option<String>,
    pub dynamic: Option<String>,
    pub images: Option<String>,
}

/// Entry limits per namespace. `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    #[serde(rename = "static")]
    pub static_assets: Option<usize>,
    pub dynamic: Option<usize>,
    pub images: Option<usize>,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            static_assets: None,
            dynamic: Some(50),
            images: Some(30),
        }
    }
}

impl CacheLimits {
    /// Limit for a namespace kind.
    pub fn for_kind(&self, kind: CacheKind) -> Option<usize> {
        match kind {
            CacheKind::Static => self.static_assets,
            CacheKind::Dynamic => self.dynamic,
            CacheKind::Images => self.images,
        }
    }
}

/// Per-asset retry after a failed bulk precache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheRetry {
    pub attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for PrecacheRetry {
    fn default() -> Self {
        Self {
            attempts: 2,
            initial_delay_ms: 100,
        }
    }
}

/// Texts of the offline page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflinePageConfig {
    pub lang: String,
    pub title: String,
    pub heading: String,
    pub paragraphs: Vec<String>,
    pub retry_label: String,
    /// Cached documents served instead of the synthesized page, in order.
    pub index_paths: Vec<String>,
}

impl Default for OfflinePageConfig {
    fn default() -> Self {
        Self {
            lang: "es".to_string(),
            title: "Sin conexión - Jeighost.lat".to_string(),
            heading: "📡 Sin conexión".to_string(),
            paragraphs: vec![
                "No hay conexión a internet en este momento.".to_string(),
                "Por favor, verifica tu conexión e intenta nuevamente.".to_string(),
            ],
            retry_label: "Reintentar".to_string(),
            index_paths: vec!["/".to_string(), "/index.html".to_string()],
        }
    }
}

/// Push notification defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    /// Click target when a payload carries no `url`.
    pub default_url: String,
    pub open_action_title: String,
    pub close_action_title: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        let icon = "/jeighost-icons-pack/icon-192x192.png".to_string();
        Self {
            title: "Jeighost.lat".to_string(),
            body: "Nueva reflexión disponible".to_string(),
            badge: icon.clone(),
            icon,
            vibrate: vec![200, 100, 200],
            tag: "jeighost-notification".to_string(),
            require_interaction: false,
            default_url: "/reflexiones.html".to_string(),
            open_action_title: "📖 Leer ahora".to_string(),
            close_action_title: "Cerrar".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_prefix: "el-rincon".to_string(),
            version: "v10.0".to_string(),
            kind_versions: KindVersions::default(),
            origin: "https://jeighost.lat/".to_string(),
            precache: default_precache(),
            html_pages: vec![
                "/reflexiones.html".to_string(),
                "/galeria.html".to_string(),
                "/sobre-mi.html".to_string(),
            ],
            limits: CacheLimits::default(),
            network_timeout_ms: 6_000,
            font_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            skip_waiting_on_install: true,
            precache_retry: PrecacheRetry::default(),
            offline: OfflinePageConfig::default(),
            notifications: NotificationDefaults::default(),
        }
    }
}

fn default_precache() -> Vec<String> {
    let mut assets: Vec<String> = [
        "/",
        "/index.html",
        "/styles.css",
        "/style.css",
        "/features.css",
        "/menu.js",
        "/features.js",
        "/install.js",
        "/notifications.js",
        "/favoritos.js",
        "/favicon.ico",
        "/manifest.json",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect();

    for size in [72, 96, 128, 144, 192, 256, 384, 512] {
        assets.push(format!("/jeighost-icons-pack/icon-{size}x{size}.png"));
    }
    assets.push("/jeighost-icons-pack/maskable-icon-512x512.png".to_string());
    assets
}

impl WorkerConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check invariants the rest of the worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_prefix.is_empty() || self.app_prefix.ends_with('-') {
            return Err(ConfigError::Invalid(format!(
                "app_prefix must be non-empty and not end with '-': {:?}",
                self.app_prefix
            )));
        }
        for kind in CacheKind::ALL {
            let version = self.version_for(kind);
            if version.is_empty() || version.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "invalid {kind} version: {version:?}"
                )));
            }
            if self.limits.for_kind(kind) == Some(0) {
                return Err(ConfigError::Invalid(format!("{kind} limit must be > 0")));
            }
        }
        if self.network_timeout_ms == 0 {
            return Err(ConfigError::Invalid("network_timeout_ms must be > 0".to_string()));
        }
        self.origin_url()?;
        Ok(())
    }

    /// Parsed origin; only http(s) origins can host a worker.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid(format!("origin {:?}: {e}", self.origin)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!("origin scheme {other:?} not allowed"))),
        }
    }

    /// Version of a namespace kind.
    pub fn version_for(&self, kind: CacheKind) -> &str {
        let overridden = match kind {
            CacheKind::Static => &self.kind_versions.static_assets,
            CacheKind::Dynamic => &self.kind_versions.dynamic,
            CacheKind::Images => &self.kind_versions.images,
        };
        overridden.as_deref().unwrap_or(&self.version)
    }

    /// Network-first deadline.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Backoff settings for precache retries.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_attempts(
            self.precache_retry.attempts,
            Duration::from_millis(self.precache_retry.initial_delay_ms),
        )
    }
}
