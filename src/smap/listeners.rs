//! Cluster Map Change Listeners
//!
//! Announces every committed cluster map version to registered listeners.
//! A single background task owns delivery; it runs while at least one
//! listener is registered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

/// Receives cluster map change notifications
pub trait SmapListener: Send + Sync {
    /// Unique registration name
    fn name(&self) -> String;

    /// Called from the notification task with the newly committed version.
    ///
    /// Must not register or unregister listeners: the listener set is
    /// read-locked for the duration of the call and doing so deadlocks.
    fn smap_changed(&self, version: u64);
}

/// Item on the notification queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    Version(u64),
    Stop,
}

type ListenerMap = HashMap<String, Arc<dyn SmapListener>>;

/// Registry of cluster map listeners
pub struct SmapListeners {
    listeners: Arc<RwLock<ListenerMap>>,
    /// Queue of the running task; `None` while there are no listeners
    sender: Mutex<Option<mpsc::Sender<Notice>>>,
    queue_size: usize,
}

impl SmapListeners {
    pub fn new(queue_size: usize) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(HashMap::with_capacity(8))),
            sender: Mutex::new(None),
            queue_size: queue_size.max(1),
        }
    }

    /// Register a listener
    ///
    /// The first registration starts the notification task and returns only
    /// once it is accepting versions. The listener joins the set after that,
    /// so a registration cancelled mid-way leaves nothing behind.
    pub async fn reg(&self, listener: Arc<dyn SmapListener>) -> Result<()> {
        let name = listener.name();
        if name.is_empty() {
            return Err(Error::Internal("listener name cannot be empty".into()));
        }

        let mut sender = self.sender.lock().await;
        if self.listeners.read().contains_key(&name) {
            return Err(Error::ListenerExists(name));
        }

        if sender.is_none() {
            let (tx, rx) = mpsc::channel(self.queue_size);
            let (ready_tx, ready_rx) = oneshot::channel();
            tokio::spawn(run(Arc::clone(&self.listeners), rx, ready_tx));
            if ready_rx.await.is_err() {
                return Err(Error::Internal("notification task failed to start".into()));
            }
            *sender = Some(tx);
            tracing::debug!("cluster map notifications started");
        }

        self.listeners.write().insert(name.clone(), listener);
        tracing::debug!("registered cluster map listener {}", name);
        Ok(())
    }

    /// Unregister a listener; the last one stops the notification task
    pub async fn unreg(&self, name: &str) -> Result<()> {
        let mut sender = self.sender.lock().await;
        let empty = {
            let mut listeners = self.listeners.write();
            if listeners.remove(name).is_none() {
                return Err(Error::ListenerNotFound(name.to_string()));
            }
            listeners.is_empty()
        };

        if empty {
            if let Some(tx) = sender.take() {
                let _ = tx.send(Notice::Stop).await;
            }
            tracing::debug!("cluster map notifications stopped");
        }
        Ok(())
    }

    /// Queue a committed version for delivery; no-op without listeners
    pub async fn notify(&self, version: u64) {
        let tx = self.sender.lock().await.clone();
        if let Some(tx) = tx {
            if tx.send(Notice::Version(version)).await.is_err() {
                tracing::warn!("dropped cluster map v{} notification: task gone", version);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.sender.lock().await.is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

/// Notification task: delivers queued versions until told to stop
async fn run(
    listeners: Arc<RwLock<ListenerMap>>,
    mut rx: mpsc::Receiver<Notice>,
    ready: oneshot::Sender<()>,
) {
    // drain
    while rx.try_recv().is_ok() {}
    let _ = ready.send(());

    while let Some(notice) = rx.recv().await {
        let version = match notice {
            Notice::Version(v) => v,
            Notice::Stop => break,
        };
        let registered = listeners.read();
        for listener in registered.values() {
            listener.smap_changed(version);
        }
    }

    // drain
    rx.close();
    while rx.try_recv().is_ok() {}
}
