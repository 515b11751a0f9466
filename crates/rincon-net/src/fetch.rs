//! `reqwest`-backed [`Fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use reqwest::Client;
use tracing::{debug, trace};

use crate::{Fetcher, NetError, Request, RequestMode, Response, ResponseType, Url};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Transport-level timeout. The worker applies its own, shorter, deadline
    /// on top of this for network-first requests.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("el-rincon-sw/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "es-ES,es;q=0.9,en;q=0.8".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches over HTTP on behalf of a worker registered at `origin`.
///
/// Responses are tagged the way a browser would tag them for that worker:
/// same-origin responses are `Basic`, cross-origin `cors` responses that
/// carry `Access-Control-Allow-Origin` are `Cors`, and cross-origin
/// `no-cors` responses are `Opaque`.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
    origin: Url,
}

impl HttpFetcher {
    /// Create a fetcher for a worker registered at `origin`.
    pub fn new(origin: Url, config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        debug!(origin = %origin, "HttpFetcher initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    /// Transport timeouts carry the configured deadline; everything else
    /// stays a `reqwest` error.
    fn transport_error(&self, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(self.config.default_timeout)
        } else {
            NetError::HttpError(error)
        }
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn response_type(&self, request: &Request, response: &reqwest::Response) -> Result<ResponseType, NetError> {
        if self.is_same_origin(response.url()) {
            return Ok(ResponseType::Basic);
        }

        match request.mode {
            RequestMode::NoCors => Ok(ResponseType::Opaque),
            RequestMode::SameOrigin => Err(NetError::RequestFailed(format!(
                "cross-origin response for same-origin request: {}",
                response.url()
            ))),
            RequestMode::Cors | RequestMode::Navigate => {
                if request.mode == RequestMode::Navigate
                    || response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN)
                {
                    Ok(ResponseType::Cors)
                } else {
                    Err(NetError::RequestFailed(format!(
                        "CORS check failed: {}",
                        response.url()
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let response_type = self.response_type(request, &response)?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            headers,
            body,
            response_type,
        })
    }
}
