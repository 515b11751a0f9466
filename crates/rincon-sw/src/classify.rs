//! Request routing.

use http::Method;
use rincon_net::{Request, RequestMode, Url};

use crate::config::WorkerConfig;
use crate::namespace::CacheKind;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];
const STATIC_EXTENSIONS: &[&str] = &["css", "js", "mjs", "svg", "woff", "woff2", "ttf", "otf", "eot"];

/// Fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; the request reaches the network untouched.
    Passthrough,
    /// Handled by `strategy` against the namespace of `kind`.
    Handle {
        strategy: Strategy,
        kind: CacheKind,
        navigation: bool,
    },
}

impl Route {
    fn handle(strategy: Strategy, kind: CacheKind) -> Self {
        Route::Handle {
            strategy,
            kind,
            navigation: false,
        }
    }
}

/// Pure request classifier.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Url,
    font_hosts: Vec<String>,
}

impl RequestClassifier {
    /// Classifier for a worker at `origin`; `font_hosts` are served cache-first.
    pub fn new(origin: Url, font_hosts: Vec<String>) -> Self {
        Self { origin, font_hosts }
    }

    /// Classifier using the configured font hosts.
    pub fn from_config(config: &WorkerConfig, origin: Url) -> Self {
        Self::new(origin, config.font_hosts.clone())
    }

    /// Pick the strategy and namespace for a request.
    pub fn classify(&self, request: &Request) -> Route {
        if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
            return Route::Passthrough;
        }

        if is_navigation(request) {
            return Route::Handle {
                strategy: Strategy::NetworkFirst,
                kind: CacheKind::Dynamic,
                navigation: true,
            };
        }

        let extension = path_extension(&request.url);
        if extension.as_deref().is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext)) {
            return Route::handle(Strategy::CacheFirst, CacheKind::Images);
        }

        if extension.as_deref().is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext))
            || self.is_font_host(&request.url)
        {
            return Route::handle(Strategy::CacheFirst, CacheKind::Static);
        }

        if request.url.origin() == self.origin.origin() {
            Route::handle(Strategy::StaleWhileRevalidate, CacheKind::Dynamic)
        } else {
            Route::handle(Strategy::NetworkFirst, CacheKind::Dynamic)
        }
    }

    fn is_font_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.font_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
    }
}

/// Navigation mode, or a GET whose `Accept` asks for HTML.
pub fn is_navigation(request: &Request) -> bool {
    request.mode == RequestMode::Navigate
        || (request.method == Method::GET && request.accepts_html())
}

fn path_extension(url: &Url) -> Option<String> {
    let last = url.path().rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}
