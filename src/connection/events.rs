//! Lifecycle event callbacks.
//!
//! The connection reports three events: `Closed`, `Reconnecting` and
//! `Reconnected`, each carrying an optional message (`None` for a clean,
//! intentional close). One callback slot per event; the slot is cloned out of
//! its lock before the callback runs, so no lock is held during user code.

use std::sync::Arc;

use tokio::sync::RwLock;

type EventCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct LifecycleEvents {
    closed: Arc<RwLock<Option<EventCallback>>>,
    reconnecting: Arc<RwLock<Option<EventCallback>>>,
    reconnected: Arc<RwLock<Option<EventCallback>>>,
}

impl LifecycleEvents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn set_closed<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        *self.closed.write().await = Some(Arc::new(callback));
    }

    pub(crate) async fn set_reconnecting<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        *self.reconnecting.write().await = Some(Arc::new(callback));
    }

    pub(crate) async fn set_reconnected<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        *self.reconnected.write().await = Some(Arc::new(callback));
    }

    pub(crate) async fn fire_closed(&self, reason: Option<String>) {
        fire(&self.closed, reason).await;
    }

    pub(crate) async fn fire_reconnecting(&self, error: Option<String>) {
        fire(&self.reconnecting, error).await;
    }

    pub(crate) async fn fire_reconnected(&self, connection_id: Option<String>) {
        fire(&self.reconnected, connection_id).await;
    }
}

async fn fire(slot: &RwLock<Option<EventCallback>>, payload: Option<String>) {
    let callback = slot.read().await.clone();
    if let Some(callback) = callback {
        callback(payload);
    }
}
