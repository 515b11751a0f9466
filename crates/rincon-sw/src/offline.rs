//! Last-resort response for navigations that neither the network nor the
//! caches could serve.

use std::fmt::Write as _;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use rincon_net::{cache_key, Request, Response, Url};
use tracing::{debug, warn};

use crate::config::OfflinePageConfig;
use crate::namespace::{CacheKind, NamespaceManager};

const OFFLINE_STYLE: &str = "\
body{font-family:'Crimson Pro',serif;background:#0b0b0c;color:#d4af37;display:flex;\
align-items:center;justify-content:center;min-height:100vh;margin:0;text-align:center;padding:2rem}\
h1{font-family:'Cinzel',serif;font-size:2rem;margin-bottom:1rem}\
p{color:#999;line-height:1.6}\
button{margin-top:2rem;padding:1rem 2rem;background:#d4af37;color:#0b0b0c;border:none;\
border-radius:5px;font-size:1rem;cursor:pointer}";

/// Builds the response for a navigation nothing else could answer.
pub struct OfflineFallback {
    namespaces: Arc<NamespaceManager>,
    index_keys: Vec<String>,
    page: Response,
}

impl OfflineFallback {
    /// Index paths are resolved against `origin`; unresolvable ones are dropped.
    pub fn new(namespaces: Arc<NamespaceManager>, config: &OfflinePageConfig, origin: &Url) -> Self {
        let index_keys = config
            .index_paths
            .iter()
            .filter_map(|path| match origin.join(path) {
                Ok(url) => Some(cache_key(&url)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Ignoring offline index path");
                    None
                }
            })
            .collect();

        Self {
            namespaces,
            index_keys,
            page: render(config),
        }
    }

    /// The synthesized offline page.
    pub fn page(&self) -> Response {
        self.page.clone()
    }

    /// The cached root document if there is one, otherwise the synthesized
    /// page. Never fails.
    pub async fn build_offline_response(&self, request: &Request) -> Response {
        for key in &self.index_keys {
            match self.namespaces.lookup(CacheKind::Static, key).await {
                Ok(Some(cached)) => {
                    debug!(url = %request.url, index = %key, "Serving cached index offline");
                    return cached;
                }
                Ok(None) => {}
                Err(e) => warn!(index = %key, error = %e, "Offline index lookup failed"),
            }
        }

        debug!(url = %request.url, "Serving synthesized offline page");
        self.page()
    }
}

/// Render the offline page. Pure: equal configs give byte-identical output.
pub fn render(config: &OfflinePageConfig) -> Response {
    let mut html = String::with_capacity(1024);
    html.push_str("<!DOCTYPE html>\n");
    let _ = writeln!(html, "<html lang=\"{}\">", escape(&config.lang));
    html.push_str("<head>\n<meta charset=\"UTF-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    let _ = writeln!(html, "<title>{}</title>", escape(&config.title));
    let _ = writeln!(html, "<style>{OFFLINE_STYLE}</style>");
    html.push_str("</head>\n<body>\n<div>\n");
    let _ = writeln!(html, "<h1>{}</h1>", escape(&config.heading));
    for paragraph in &config.paragraphs {
        let _ = writeln!(html, "<p>{}</p>", escape(paragraph));
    }
    let _ = writeln!(
        html,
        "<button onclick=\"window.location.reload()\">{}</button>",
        escape(&config.retry_label)
    );
    html.push_str("</div>\n</body>\n</html>\n");

    Response::new(StatusCode::SERVICE_UNAVAILABLE, html).with_header(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
