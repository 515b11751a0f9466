//! Pages the worker can reach.
//!
//! [`ClientHost`] is the slice of the `clients` global the worker uses:
//! enumerate windows, focus one, open one, claim all. [`WindowClients`] is
//! the in-process host used by the smoke harness and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rincon_net::Url;
use tracing::debug;

use crate::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    Hidden,
    #[default]
    Visible,
}

/// A page (or worker) in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub visibility_state: VisibilityState,
    pub focused: bool,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// A visible, uncontrolled window at `url`.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled: false,
        }
    }
}

/// Options for [`ClientHost::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    /// `None` matches every type.
    pub client_type: Option<ClientType>,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: Some(ClientType::Window),
        }
    }
}

/// The pages the worker can see and control.
#[async_trait]
pub trait ClientHost: Send + Sync {
    async fn match_all(&self, options: ClientMatchOptions) -> Result<Vec<Client>, ServiceWorkerError>;

    /// Focus a window client and return its updated snapshot.
    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError>;

    /// Open a new focused window at `url`.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Take control of every client in scope.
    async fn claim(&self) -> Result<(), ServiceWorkerError>;
}

/// In-process client registry, in insertion order.
#[derive(Debug, Default)]
pub struct WindowClients {
    clients: Mutex<Vec<Client>>,
    next_id: AtomicU64,
}

impl WindowClients {
    /// Empty client list.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Client>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a client, replacing any client with the same id.
    pub fn add(&self, client: Client) {
        let mut clients = self.lock();
        clients.retain(|c| c.id != client.id);
        clients.push(client);
    }

    /// Client by id.
    pub fn get(&self, id: &str) -> Option<Client> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Client> {
        self.lock().clone()
    }
}

#[async_trait]
impl ClientHost for WindowClients {
    async fn match_all(&self, options: ClientMatchOptions) -> Result<Vec<Client>, ServiceWorkerError> {
        Ok(self
            .lock()
            .iter()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| options.client_type.map_or(true, |t| c.client_type == t))
            .cloned()
            .collect())
    }

    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.lock();
        let Some(index) = clients.iter().position(|c| c.id == id) else {
            return Err(ServiceWorkerError::Client(format!("No client with id {id}")));
        };
        if clients[index].client_type != ClientType::Window {
            return Err(ServiceWorkerError::Client(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in clients.iter_mut() {
            client.focused = client.id == id;
        }
        clients[index].visibility_state = VisibilityState::Visible;
        debug!(client = %id, "Focused client");
        Ok(clients[index].clone())
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut client = Client::window(id, url.clone());
        client.focused = true;
        client.controlled = true;

        let mut clients = self.lock();
        for other in clients.iter_mut() {
            other.focused = false;
        }
        clients.push(client.clone());
        debug!(client = %client.id, url = %url, "Opened window");
        Ok(client)
    }

    async fn claim(&self) -> Result<(), ServiceWorkerError> {
        let mut clients = self.lock();
        for client in clients.iter_mut() {
            client.controlled = true;
        }
        debug!(count = clients.len(), "Claimed clients");
        Ok(())
    }
}
