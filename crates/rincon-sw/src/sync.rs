//! Background sync: refresh cached pages once the connection is back.

use futures::future::join_all;
use rincon_common::with_timeout;
use rincon_net::Request;
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::namespace::CacheKind;
use crate::strategy::StrategyEngine;

/// Tag the pages register for a content refresh.
pub const SYNC_CONTENT_TAG: &str = "sync-content";

/// Outcome of a background refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub refreshed: usize,
    /// Fresh response fetched but not cacheable.
    pub skipped: usize,
    pub failed: usize,
}

/// Re-fetch every entry of `kind` and overwrite those whose fresh response
/// is cacheable. Entries that fail to refresh keep their old value.
pub async fn refresh_namespace(engine: &StrategyEngine, kind: CacheKind) -> Result<SyncReport, CacheError> {
    let namespaces = engine.namespaces();
    let name = namespaces.name(kind);
    let keys = namespaces.storage().keys(name).await?;
    debug!(cache = %name, entries = keys.len(), "Refreshing cached entries");

    let outcomes = join_all(keys.iter().map(|key| refresh_entry(engine, kind, key))).await;

    let mut report = SyncReport::default();
    for outcome in outcomes {
        match outcome {
            Some(true) => report.refreshed += 1,
            Some(false) => report.skipped += 1,
            None => report.failed += 1,
        }
    }

    info!(
        cache = %name,
        refreshed = report.refreshed,
        skipped = report.skipped,
        failed = report.failed,
        "Background sync finished"
    );
    Ok(report)
}

/// `Some(stored)` when the fetch completed, `None` when it did not.
async fn refresh_entry(engine: &StrategyEngine, kind: CacheKind, key: &str) -> Option<bool> {
    let request = match Request::parse(key) {
        Ok(request) => request,
        Err(e) => {
            warn!(key = %key, error = %e, "Cached key is not a URL");
            return None;
        }
    };

    match with_timeout(engine.timeout(), engine.fetcher().fetch(&request)).await {
        Ok(Ok(response)) => Some(engine.store(kind, key, &response).await),
        Ok(Err(e)) => {
            debug!(key = %key, error = %e, "Refresh failed");
            None
        }
        Err(e) => {
            debug!(key = %key, error = %e, "Refresh timed out");
            None
        }
    }
}
