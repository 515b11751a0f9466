//! Push payloads in, notifications out, clicks back to pages.
//!
//! Notification state is `Idle → Displayed → Closed`. Every notification
//! shares one tag, so a newer push replaces the one on screen.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rincon_net::Url;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::clients::{Client, ClientHost, ClientMatchOptions};
use crate::config::NotificationDefaults;
use crate::ServiceWorkerError;

/// Action id that opens the target page.
pub const OPEN_ACTION: &str = "open";

/// Action id that only dismisses.
pub const CLOSE_ACTION: &str = "close";

/// Decoded push data. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Decode push data. A JSON object gives its string fields, any other
    /// JSON value gives nothing, and non-JSON data is the body text. Never
    /// fails.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };

        match serde_json::from_slice::<JsonValue>(data) {
            Ok(JsonValue::Object(fields)) => {
                let field = |name: &str| fields.get(name).and_then(JsonValue::as_str).map(str::to_string);
                Self {
                    title: field("title"),
                    body: field("body"),
                    url: field("url"),
                }
            }
            Ok(other) => {
                debug!(kind = json_kind(&other), "Push data is JSON but not an object, using defaults");
                Self::default()
            }
            Err(e) => {
                debug!(error = %e, "Push data is not JSON, using it as text");
                Self {
                    body: Some(String::from_utf8_lossy(data).into_owned()),
                    ..Default::default()
                }
            }
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    /// Page to open on click, relative to the origin.
    pub url: String,
}

/// A notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl Notification {
    /// Build a notification, filling gaps in `payload` from `defaults`.
    /// Empty strings count as missing.
    pub fn from_payload(payload: &PushPayload, defaults: &NotificationDefaults) -> Self {
        let pick = |value: &Option<String>, fallback: &str| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        Self {
            title: pick(&payload.title, &defaults.title),
            body: pick(&payload.body, &defaults.body),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            tag: defaults.tag.clone(),
            require_interaction: defaults.require_interaction,
            actions: vec![
                NotificationAction {
                    action: OPEN_ACTION.to_string(),
                    title: defaults.open_action_title.clone(),
                    icon: Some(defaults.icon.clone()),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: defaults.close_action_title.clone(),
                    icon: None,
                },
            ],
            data: NotificationData {
                url: pick(&payload.url, &defaults.default_url),
            },
        }
    }
}

/// Where notifications are shown.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<(), ServiceWorkerError>;

    /// Remove the notification with `tag`. Closing an absent one is not an
    /// error.
    async fn close(&self, tag: &str) -> Result<(), ServiceWorkerError>;
}

/// Host that only logs; for headless runs.
#[derive(Debug, Default)]
pub struct TracingNotificationHost;

#[async_trait]
impl NotificationHost for TracingNotificationHost {
    async fn show(&self, notification: &Notification) -> Result<(), ServiceWorkerError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            url = %notification.data.url,
            "Notification"
        );
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        debug!(tag = %tag, "Notification closed");
        Ok(())
    }
}

/// Lifecycle of the last notification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NotificationState {
    #[default]
    Idle,
    Displayed(Notification),
    Closed,
}

/// What a click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(Client),
    Opened(Client),
    Dismissed,
}

/// Turns push events into notifications and clicks into focused pages.
pub struct PushBridge {
    defaults: NotificationDefaults,
    origin: Url,
    host: Arc<dyn NotificationHost>,
    clients: Arc<dyn ClientHost>,
    state: Mutex<NotificationState>,
}

impl PushBridge {
    /// Create a bridge showing notifications through `host`.
    pub fn new(
        defaults: NotificationDefaults,
        origin: Url,
        host: Arc<dyn NotificationHost>,
        clients: Arc<dyn ClientHost>,
    ) -> Self {
        Self {
            defaults,
            origin,
            host,
            clients,
            state: Mutex::new(NotificationState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// State of the last notification.
    pub fn state(&self) -> NotificationState {
        self.lock().clone()
    }

    /// Decode `data` and display the resulting notification. Malformed data
    /// degrades to defaults; only a host failure is an error.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        let payload = PushPayload::parse(data);
        let notification = Notification::from_payload(&payload, &self.defaults);

        self.host.show(&notification).await?;
        info!(title = %notification.title, url = %notification.data.url, "Displayed notification");
        *self.lock() = NotificationState::Displayed(notification.clone());
        Ok(notification)
    }

    /// Close the notification, then for the default or "open" action focus a
    /// window already at the target or open a new one.
    pub async fn handle_click(
        &self,
        notification: &Notification,
        action: &str,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        if let Err(e) = self.host.close(&notification.tag).await {
            warn!(tag = %notification.tag, error = %e, "Failed to close notification");
        }
        *self.lock() = NotificationState::Closed;

        if !action.is_empty() && action != OPEN_ACTION {
            debug!(action = %action, "Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let target = self.resolve_target(&notification.data.url)?;
        let windows = self.clients.match_all(ClientMatchOptions::all_windows()).await?;
        if let Some(existing) = windows.iter().find(|c| c.url == target) {
            let focused = self.clients.focus(&existing.id).await?;
            info!(client = %focused.id, url = %target, "Focused existing window");
            return Ok(ClickOutcome::Focused(focused));
        }

        let opened = self.clients.open_window(&target).await?;
        info!(client = %opened.id, url = %target, "Opened window");
        Ok(ClickOutcome::Opened(opened))
    }

    fn resolve_target(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        match self.origin.join(url) {
            Ok(target) => Ok(target),
            Err(e) => {
                warn!(url = %url, error = %e, "Bad notification target, using default");
                self.origin
                    .join(&self.defaults.default_url)
                    .map_err(|e| ServiceWorkerError::Notification(e.to_string()))
            }
        }
    }
}
