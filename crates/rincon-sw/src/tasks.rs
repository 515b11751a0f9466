//! Work that may finish after a response has been returned.
//!
//! A browser keeps a worker alive for promises passed to
//! `event.waitUntil()`. [`BackgroundTasks`] is that mechanism: detached
//! tasks are spawned immediately, never awaited by the response path, and
//! [`BackgroundTasks::settle`] waits for all of them (the point at which the
//! host may tear the worker down).

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, debug_span, warn, Instrument};

/// Work that outlives the response it was started for.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `task` and keep the worker alive until it settles.
    pub fn wait_until<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task.instrument(debug_span!("background", task = label)));
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every registered task, including tasks registered while
    /// waiting.
    pub async fn settle(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            debug!(count = batch.len(), "Settling background tasks");
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task panicked or was cancelled");
                }
            }
        }
    }
}
