//! # Rincon Net
//!
//! Request and response model for the el-rincon service worker, plus the
//! [`Fetcher`] seam the worker uses to reach the network.
//!
//! ## Design Goals
//!
//! 1. **Browser-shaped types**: requests carry a mode, responses carry a type,
//!    so "opaque" and "navigation" mean what they mean in a browser.
//! 2. **Replaceable network**: the worker only sees `dyn Fetcher`; tests
//!    inject scripted fetchers, the smoke harness uses [`HttpFetcher`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;

pub mod fetch;

pub use fetch::{HttpFetcher, LoaderConfig};
pub use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate the next id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as set by the page that issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Same-origin only; cross-origin targets fail.
    SameOrigin,
    /// Cross-origin allowed; the response must opt in with CORS headers.
    Cors,
    /// Cross-origin allowed without CORS; the response is opaque.
    #[default]
    NoCors,
}

/// A request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl Request {
    /// Create a sub-resource GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::NoCors,
        }
    }

    /// Create a navigation request for a full HTML document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .with_mode(RequestMode::Navigate)
            .header(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"))
    }

    /// Parse a URL and create a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }

    /// Cache key: the absolute URL with its fragment removed. The query
    /// string is part of the key.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// A fresh GET request for the same URL and mode, used for background
    /// refreshes so they never share an id with the foreground request.
    pub fn refetch(&self) -> Self {
        Self {
            id: RequestId::new(),
            ..self.clone()
        }
    }
}

/// Normalize a URL into a cache key.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Response type, mirroring `Response.type` in a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin network response.
    Basic,
    /// Cross-origin response that passed a CORS check.
    Cors,
    /// Cross-origin no-cors response; its status cannot be trusted on replay.
    Opaque,
    /// Built by the worker itself.
    #[default]
    Default,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, if the response came from the network.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
}

impl Response {
    /// Create a synthetic response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Default,
        }
    }

    /// Generic "content unavailable" response for a failed sub-resource.
    pub fn unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Whether this response may be written to a cache: exactly 200 and not
    /// opaque.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.response_type != ResponseType::Opaque
    }

    /// The `Content-Type` header, if present and valid.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The network as seen by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}
