//! Page → worker message channel.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Commands a page may post to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Delete every app-owned cache.
    ClearCache,
    /// Reply on the supplied port with per-namespace entry counts.
    GetCacheInfo,
}

impl ClientMessage {
    /// Decode a posted value. Anything that is not a known command is `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reply to [`ClientMessage::GetCacheInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    #[serde(rename = "static")]
    pub static_entries: usize,
    pub dynamic: usize,
    pub images: usize,
    pub total: usize,
}

impl CacheInfo {
    /// Counts per namespace; the total is derived.
    pub fn new(static_entries: usize, dynamic: usize, images: usize) -> Self {
        Self {
            static_entries,
            dynamic,
            images,
            total: static_entries + dynamic + images,
        }
    }
}
