//! End-to-end worker scenarios against in-memory hosts.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use rincon_net::{Request, Response, ResponseType, Url};
use rincon_sw::cache::{CacheBackend, MemoryCacheStorage};
use rincon_sw::clients::{Client, WindowClients};
use rincon_sw::config::{CacheLimits, PrecacheRetry};
use rincon_sw::testing::{FlakyCacheStorage, RecordingNotificationHost, ScriptedFetcher};
use rincon_sw::{
    CacheKind, ClickOutcome, FetchOutcome, MessageOutcome, ServiceWorkerError, ServiceWorkerState, SiteWorker,
    WorkerConfig, WorkerHost,
};
use serde_json::json;
use tokio::sync::oneshot;

const ORIGIN: &str = "https://jeighost.lat";

fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

fn config(precache: &[&str]) -> WorkerConfig {
    WorkerConfig {
        precache: precache.iter().map(|p| p.to_string()).collect(),
        html_pages: Vec::new(),
        precache_retry: PrecacheRetry {
            attempts: 1,
            initial_delay_ms: 0,
        },
        ..Default::default()
    }
}

struct Harness {
    worker: SiteWorker,
    fetcher: Arc<ScriptedFetcher>,
    storage: Arc<MemoryCacheStorage>,
    notifications: Arc<RecordingNotificationHost>,
    clients: Arc<WindowClients>,
}

fn harness_with(config: WorkerConfig, storage: Arc<MemoryCacheStorage>) -> Harness {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let notifications = Arc::new(RecordingNotificationHost::new());
    let clients = Arc::new(WindowClients::new());
    let host = WorkerHost::new(fetcher.clone())
        .with_storage(storage.clone())
        .with_notifications(notifications.clone())
        .with_clients(clients.clone());
    let (worker, _events) = SiteWorker::new(config, host).unwrap();

    Harness {
        worker,
        fetcher,
        storage,
        notifications,
        clients,
    }
}

fn harness(config: WorkerConfig) -> Harness {
    harness_with(config, Arc::new(MemoryCacheStorage::new()))
}

/// Installed and active with an empty manifest.
async fn active(config: WorkerConfig) -> Harness {
    let h = harness(config);
    h.worker.install().await.unwrap();
    assert_eq!(h.worker.state().await, ServiceWorkerState::Activated);
    h
}

async fn keys(h: &Harness, kind: CacheKind) -> Vec<String> {
    h.storage
        .keys(h.worker.namespaces().name(kind))
        .await
        .unwrap()
}

async fn fetch(h: &Harness, request: &Request) -> Response {
    match h.worker.handle_fetch(request).await {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => panic!("{} was not intercepted", request.url),
    }
}

#[tokio::test]
async fn test_install_survives_missing_asset() {
    let h = harness(config(&["/index.html", "/style.css"]));
    h.fetcher.respond(&url("/index.html"), StatusCode::OK, "<html>home</html>");
    h.fetcher.respond(&url("/style.css"), StatusCode::NOT_FOUND, "");

    let report = h.worker.install().await.unwrap();

    assert_eq!(report.cached, 1);
    assert_eq!(report.failed, vec!["/style.css".to_string()]);
    assert_eq!(keys(&h, CacheKind::Static).await, vec![url("/index.html")]);
    assert_ne!(h.worker.state().await, ServiceWorkerState::Redundant);
}

#[tokio::test]
async fn test_install_fails_when_nothing_caches() {
    let h = harness(config(&["/index.html", "/style.css"]));
    h.fetcher.set_offline(true);

    let result = h.worker.install().await;
    assert!(matches!(result, Err(ServiceWorkerError::Install(_))));
    assert_eq!(h.worker.state().await, ServiceWorkerState::Redundant);
}

#[tokio::test]
async fn test_install_retries_failed_assets() {
    let mut config = config(&["/index.html", "/menu.js"]);
    config.precache_retry = PrecacheRetry {
        attempts: 3,
        initial_delay_ms: 1,
    };
    let h = harness(config);
    h.fetcher.respond(&url("/index.html"), StatusCode::OK, "home");
    h.fetcher.fail(&url("/menu.js"));

    let report = h.worker.install().await.unwrap();
    assert_eq!(report.cached, 1);
    // one bulk attempt plus three retries
    assert_eq!(h.fetcher.call_count(&url("/menu.js")), 4);
}

#[tokio::test]
async fn test_install_precaches_pages_best_effort() {
    let mut config = config(&["/index.html"]);
    config.html_pages = vec!["/reflexiones.html".into(), "/galeria.html".into()];
    let h = harness(config);
    h.fetcher.respond(&url("/index.html"), StatusCode::OK, "home");
    h.fetcher.respond(&url("/reflexiones.html"), StatusCode::OK, "list");
    h.fetcher.fail(&url("/galeria.html"));

    let report = h.worker.install().await.unwrap();
    assert_eq!(report.pages_cached, 1);
    assert_eq!(report.pages_failed, vec!["/galeria.html".to_string()]);
    assert_eq!(keys(&h, CacheKind::Dynamic).await, vec![url("/reflexiones.html")]);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_returns_live_response_without_caching() {
    let h = active(config(&[])).await;
    h.fetcher.delay(
        &url("/reflexion3.html"),
        Duration::from_millis(200),
        Response::new(StatusCode::OK, "<html>3</html>"),
    );

    let request = Request::navigate(Url::parse(&url("/reflexion3.html")).unwrap());
    let response = fetch(&h, &request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), "<html>3</html>");
    h.worker.settle().await;
    assert!(keys(&h, CacheKind::Dynamic).await.is_empty());
}

#[tokio::test]
async fn test_image_is_cached_then_served_offline() {
    let h = active(config(&[])).await;
    h.fetcher.respond(&url("/icon-192.png"), StatusCode::OK, "png");

    let request = Request::parse(&url("/icon-192.png")).unwrap();
    assert_eq!(fetch(&h, &request).await.text().unwrap(), "png");
    assert_eq!(keys(&h, CacheKind::Images).await, vec![url("/icon-192.png")]);

    h.fetcher.set_offline(true);
    let again = fetch(&h, &request.refetch()).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.text().unwrap(), "png");
    h.worker.settle().await;
}

#[tokio::test]
async fn test_plain_text_push_uses_default_title() {
    let h = harness(config(&[]));

    let notification = h.worker.handle_push(Some(b"Plain text body")).await.unwrap();

    assert_eq!(notification.title, "Jeighost.lat");
    assert_eq!(notification.body, "Plain text body");
    assert_eq!(h.notifications.shown(), vec![notification]);
}

#[tokio::test]
async fn test_full_dynamic_namespace_evicts_oldest() {
    let h = active(config(&[])).await;
    let dynamic = h.worker.namespaces().name(CacheKind::Dynamic).to_string();
    for i in 0..50 {
        h.storage
            .put(&dynamic, &url(&format!("/data/{i}.json")), Response::new(StatusCode::OK, "old"))
            .await
            .unwrap();
    }
    h.fetcher.respond(&url("/data/new.json"), StatusCode::OK, "new");

    let request = Request::parse(&url("/data/new.json")).unwrap();
    assert_eq!(fetch(&h, &request).await.text().unwrap(), "new");

    let keys = keys(&h, CacheKind::Dynamic).await;
    assert_eq!(keys.len(), 50);
    assert!(!keys.contains(&url("/data/0.json")));
    assert!(keys.contains(&url("/data/1.json")));
    assert_eq!(keys.last(), Some(&url("/data/new.json")));
}

#[tokio::test]
async fn test_new_version_purges_previous_namespaces() {
    let storage = Arc::new(MemoryCacheStorage::new());

    let v1 = harness_with(config(&["/index.html"]), storage.clone());
    v1.fetcher.respond_by_default(Response::new(StatusCode::OK, "v1"));
    v1.worker.install().await.unwrap();
    let request = Request::parse(&url("/foto.jpg")).unwrap();
    fetch(&v1, &request).await;
    v1.worker.settle().await;
    let old_names: Vec<String> = CacheKind::ALL
        .iter()
        .map(|kind| v1.worker.namespaces().name(*kind).to_string())
        .collect();

    let mut next = config(&["/index.html"]);
    next.version = "v11.0".to_string();
    let v2 = harness_with(next, storage.clone());
    v2.fetcher.respond_by_default(Response::new(StatusCode::OK, "v2"));
    v2.worker.install().await.unwrap();

    for name in &old_names {
        assert!(storage.keys(name).await.unwrap().is_empty(), "{name} survived");
        assert!(!storage.has(name).await.unwrap());
    }
    assert_eq!(storage.len("el-rincon-static-v11.0").await, 1);
}

/// A worker over flaky storage, serving `/` from the network.
fn worker_over(storage: Arc<FlakyCacheStorage>) -> SiteWorker {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(&url("/"), StatusCode::OK, "<html>home</html>");
    let host = WorkerHost::new(fetcher).with_storage(storage);
    let (worker, _events) = SiteWorker::new(config(&["/"]), host).unwrap();
    worker
}

#[tokio::test]
async fn test_failed_stale_delete_does_not_block_activation() {
    let storage = Arc::new(FlakyCacheStorage::new());
    for name in [
        "el-rincon-static-v9.0",
        "el-rincon-dynamic-v9.0",
        "el-rincon-images-v9.0",
        "otra-app-static-v1",
    ] {
        storage.open(name).await.unwrap();
    }
    storage.fail_delete_of("el-rincon-static-v9.0");

    let worker = worker_over(storage.clone());
    let report = worker.install().await.unwrap();

    assert_eq!(report.cached, 1);
    assert_eq!(worker.state().await, ServiceWorkerState::Activated);
    let names = storage.names().await.unwrap();
    assert!(names.contains(&"el-rincon-static-v9.0".to_string()));
    assert!(!names.contains(&"el-rincon-dynamic-v9.0".to_string()));
    assert!(!names.contains(&"el-rincon-images-v9.0".to_string()));
    assert!(names.contains(&"otra-app-static-v1".to_string()));
    assert!(names.contains(&"el-rincon-static-v10.0".to_string()));
}

#[tokio::test]
async fn test_unlistable_storage_does_not_block_activation() {
    let storage = Arc::new(FlakyCacheStorage::new());
    storage.open("el-rincon-dynamic-v9.0").await.unwrap();
    storage.fail_listing(true);

    let worker = worker_over(storage.clone());
    worker.install().await.unwrap();
    assert_eq!(worker.state().await, ServiceWorkerState::Activated);

    storage.fail_listing(false);
    assert!(storage.has("el-rincon-dynamic-v9.0").await.unwrap());
    let request = Request::navigate(Url::parse(&url("/")).unwrap());
    assert!(matches!(worker.handle_fetch(&request).await, FetchOutcome::Respond(_)));
}

#[tokio::test(start_paused = true)]
async fn test_hung_network_resolves_within_deadline() {
    let h = active(config(&[])).await;
    h.fetcher.hang(&url("/reflexion7.html"));

    let request = Request::navigate(Url::parse(&url("/reflexion7.html")).unwrap());
    let started = tokio::time::Instant::now();
    let response = fetch(&h, &request).await;

    assert!(started.elapsed() <= Duration::from_millis(6_050));
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.text().unwrap().contains("Sin conexión"));
}

#[tokio::test]
async fn test_offline_navigation_prefers_cached_index() {
    let h = harness(config(&["/", "/index.html"]));
    h.fetcher.respond(&url("/"), StatusCode::OK, "<html>root</html>");
    h.fetcher.respond(&url("/index.html"), StatusCode::OK, "<html>index</html>");
    h.worker.install().await.unwrap();

    h.fetcher.set_offline(true);
    let request = Request::navigate(Url::parse(&url("/reflexion9.html")).unwrap());
    let first = fetch(&h, &request).await;
    let second = fetch(&h, &request.refetch()).await;

    assert_eq!(first.text().unwrap(), "<html>root</html>");
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn test_nothing_uncacheable_is_ever_stored() {
    let h = active(config(&[])).await;
    h.fetcher.respond_with(
        "https://cdn.example.com/banner.webp",
        Response::new(StatusCode::OK, "img").with_type(ResponseType::Opaque),
    );
    h.fetcher.respond(&url("/missing.css"), StatusCode::NOT_FOUND, "");
    h.fetcher.respond(&url("/partial.json"), StatusCode::PARTIAL_CONTENT, "{");
    h.fetcher.respond(&url("/ok.json"), StatusCode::OK, "{}");

    for target in [
        "https://cdn.example.com/banner.webp".to_string(),
        url("/missing.css"),
        url("/partial.json"),
        url("/ok.json"),
    ] {
        fetch(&h, &Request::parse(&target).unwrap()).await;
    }
    h.worker.settle().await;

    for kind in CacheKind::ALL {
        let name = h.worker.namespaces().name(kind);
        for key in h.storage.keys(name).await.unwrap() {
            let entry = h.storage.match_entry(name, &key).await.unwrap().unwrap();
            assert!(entry.is_cacheable(), "{key} stored with {}", entry.status);
        }
    }
    assert_eq!(keys(&h, CacheKind::Dynamic).await, vec![url("/ok.json")]);
    assert!(keys(&h, CacheKind::Images).await.is_empty());
}

#[tokio::test]
async fn test_cache_info_and_clear_messages() {
    let h = active(config(&[])).await;
    h.fetcher.respond(&url("/icon.png"), StatusCode::OK, "png");
    h.fetcher.respond(&url("/app.json"), StatusCode::OK, "{}");
    fetch(&h, &Request::parse(&url("/icon.png")).unwrap()).await;
    fetch(&h, &Request::parse(&url("/app.json")).unwrap()).await;
    h.worker.settle().await;

    let (port, reply) = oneshot::channel();
    h.worker
        .handle_message(&json!({ "type": "GET_CACHE_INFO" }), Some(port))
        .await
        .unwrap();
    let info = reply.await.unwrap();
    assert_eq!(
        serde_json::to_value(info).unwrap(),
        json!({ "static": 0, "dynamic": 1, "images": 1, "total": 2 })
    );

    h.storage.open("someone-else").await.unwrap();
    let outcome = h
        .worker
        .handle_message(&json!({ "type": "CLEAR_CACHE" }), None)
        .await
        .unwrap();
    assert!(matches!(outcome, MessageOutcome::Cleared(ref report) if report.deleted.len() == 3));
    assert_eq!(h.storage.names().await.unwrap(), vec!["someone-else"]);
}

#[tokio::test]
async fn test_sync_refreshes_dynamic_entries() {
    let h = active(config(&[])).await;
    h.fetcher.respond(&url("/feed.json"), StatusCode::OK, "v1");
    fetch(&h, &Request::parse(&url("/feed.json")).unwrap()).await;
    h.worker.settle().await;

    h.fetcher.respond(&url("/feed.json"), StatusCode::OK, "v2");
    let report = h.worker.handle_sync("sync-content").await.unwrap().unwrap();
    assert_eq!(report.refreshed, 1);

    let dynamic = h.worker.namespaces().name(CacheKind::Dynamic);
    let entry = h.storage.match_entry(dynamic, &url("/feed.json")).await.unwrap().unwrap();
    assert_eq!(entry.text().unwrap(), "v2");
}

#[tokio::test]
async fn test_notification_click_focuses_open_page() {
    let h = harness(config(&[]));
    h.clients.add(Client::window("reader", Url::parse(&url("/reflexion12.html")).unwrap()));

    let notification = h
        .worker
        .handle_push(Some(br#"{"title":"Nueva","body":"Lee la 12","url":"/reflexion12.html"}"#))
        .await
        .unwrap();
    let outcome = h.worker.handle_notification_click(&notification, "").await.unwrap();

    assert!(matches!(outcome, ClickOutcome::Focused(ref client) if client.id == "reader"));
    assert_eq!(h.notifications.closed(), vec!["jeighost-notification".to_string()]);
}

#[tokio::test]
async fn test_limits_are_configurable() {
    let mut config = config(&[]);
    config.limits = CacheLimits {
        images: Some(2),
        ..Default::default()
    };
    let h = active(config).await;
    h.fetcher.respond_by_default(Response::new(StatusCode::OK, "img"));

    for i in 0..5 {
        fetch(&h, &Request::parse(&url(&format!("/g/{i}.png"))).unwrap()).await;
    }
    h.worker.settle().await;
    assert_eq!(keys(&h, CacheKind::Images).await, vec![url("/g/3.png"), url("/g/4.png")]);
}
