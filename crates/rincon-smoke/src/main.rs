//! Rincon Smoke Harness
//!
//! Drives the service worker against a live origin: install, activate,
//! fetch a list of paths (optionally a second time with the network
//! disabled) and print cache counts and timings as JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use rincon_common::{init_logging, LogConfig};
use rincon_net::{Fetcher, HttpFetcher, LoaderConfig, NetError, Request, Response, Url};
use rincon_sw::{FetchOutcome, SiteWorker, WorkerConfig, WorkerHost};
use serde_json::json;
use tracing::{error, info, warn};

/// Performance timing collector for tracking operation durations.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();

        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }

            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total_ms: f64 = ms.iter().sum();
            let round = |v: f64| (v * 100.0).round() / 100.0;

            summary.insert(
                op.to_string(),
                json!({
                    "count": ms.len(),
                    "total_ms": round(total_ms),
                    "avg_ms": round(total_ms / ms.len() as f64),
                    "min_ms": round(ms.iter().copied().fold(f64::INFINITY, f64::min)),
                    "max_ms": round(ms.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<String>,
    origin: Option<String>,
    offline_pass: bool,
    json_logs: bool,
    log_filter: Option<String>,
    paths: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut origin = None;
        let mut offline_pass = false;
        let mut json_logs = false;
        let mut log_filter = None;
        let mut paths = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = args.next(),
                "--origin" => origin = args.next(),
                "--offline-pass" => offline_pass = true,
                "--json-logs" => json_logs = true,
                "--log-filter" => log_filter = args.next(),
                other if other.starts_with("--") => eprintln!("Warning: ignoring unknown flag {other}"),
                _ => paths.push(arg),
            }
        }

        if paths.is_empty() {
            paths = vec!["/".to_string(), "/reflexiones.html".to_string(), "/style.css".to_string()];
        }

        Self {
            config,
            origin,
            offline_pass,
            json_logs,
            log_filter,
            paths,
        }
    }

    fn load_config(&self) -> anyhow::Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::from_file(path).with_context(|| format!("loading {path}"))?,
            None => WorkerConfig::default(),
        };
        if let Some(origin) = &self.origin {
            config.origin = origin.clone();
        }
        Ok(config)
    }
}

/// The real fetcher behind a switch, for the offline pass.
struct OfflineSwitch {
    inner: HttpFetcher,
    offline: AtomicBool,
}

impl OfflineSwitch {
    fn new(inner: HttpFetcher) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for OfflineSwitch {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network disabled".to_string()));
        }
        self.inner.fetch(request).await
    }
}

async fn fetch_pass(
    worker: &SiteWorker,
    origin: &Url,
    paths: &[String],
    label: &'static str,
    perf: &mut PerfTiming,
) -> Vec<serde_json::Value> {
    let mut results = Vec::new();
    for path in paths {
        let url = match origin.join(path) {
            Ok(url) => url,
            Err(e) => {
                warn!(path = %path, error = %e, "Skipping unresolvable path");
                continue;
            }
        };
        let request = if path.ends_with(".html") || path.ends_with('/') {
            Request::navigate(url)
        } else {
            Request::get(url)
        };

        let start = Instant::now();
        let outcome = worker.handle_fetch(&request).await;
        perf.record(label, start.elapsed());

        let entry = match outcome {
            FetchOutcome::Respond(response) => json!({
                "path": path,
                "status": response.status.as_u16(),
                "bytes": response.body.len(),
                "content_type": response.content_type(),
            }),
            FetchOutcome::Passthrough => json!({ "path": path, "passthrough": true }),
        };
        info!(pass = label, %entry, "Fetched");
        results.push(entry);
    }
    results
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut log_config = if args.json_logs {
        LogConfig::production()
    } else {
        LogConfig::compact()
    };
    if let Some(filter) = &args.log_filter {
        log_config = log_config.with_filter(filter.clone());
    }
    init_logging(log_config);

    let config = args.load_config()?;
    let origin = config.origin_url()?;
    let fetcher = Arc::new(OfflineSwitch::new(HttpFetcher::new(origin.clone(), LoaderConfig::default())?));
    let (worker, _events) = SiteWorker::new(config, WorkerHost::new(fetcher.clone()))?;
    let mut perf = PerfTiming::default();

    let start = Instant::now();
    let install = match worker.install().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Install failed");
            bail!("install failed: {e}");
        }
    };
    perf.record("install", start.elapsed());

    let start = Instant::now();
    worker.activate().await?;
    perf.record("activate", start.elapsed());

    let online = fetch_pass(&worker, &origin, &args.paths, "fetch_online", &mut perf).await;
    info!(pending = worker.pending_tasks(), "Waiting for background refreshes");
    worker.settle().await;

    let offline = if args.offline_pass {
        fetcher.set_offline(true);
        let results = fetch_pass(&worker, &origin, &args.paths, "fetch_offline", &mut perf).await;
        worker.settle().await;
        results
    } else {
        Vec::new()
    };

    let info = worker.namespaces().cache_info().await?;
    let summary = json!({
        "origin": origin.as_str(),
        "install": {
            "cached": install.cached,
            "failed": install.failed,
            "pages_cached": install.pages_cached,
            "pages_failed": install.pages_failed,
        },
        "online": online,
        "offline": offline,
        "cache_info": info,
        "timings": perf.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
