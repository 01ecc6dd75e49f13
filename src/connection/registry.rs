//! Pending-invocation tracking.
//!
//! Every invocation that expects a completion gets a ticket: an id from the
//! wrapping counter and a oneshot channel the reader task resolves when the
//! matching `Completion` record arrives. The caller side holds an
//! [`InvocationHandle`] that awaits the channel under the invocation's
//! timeout.
//!
//! The id counter and the pending map sit behind separate locks; no
//! operation holds both at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SignalRError;

/// Reason handed to every ticket failed by [`InvocationRegistry::close_all`].
pub(crate) const CLOSED_REASON: &str = "HubConnection was closed";

type CompletionResult = Result<Value, String>;

/// Registry of invocations awaiting their completion.
#[derive(Clone)]
pub(crate) struct InvocationRegistry {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<CompletionResult>>>>,
    counter: Arc<Mutex<u32>>,
}

impl InvocationRegistry {
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(Mutex::new(0)),
        }
    }

    /// Allocates the next invocation id and registers a ticket for it.
    ///
    /// The counter wraps silently; the pending backlog is bounded by server
    /// round-trips, so a wrapped id can never collide with a live ticket.
    pub(crate) async fn begin(&self) -> (String, oneshot::Receiver<CompletionResult>) {
        let id = {
            let mut counter = self.counter.lock().await;
            let id = *counter;
            *counter = counter.wrapping_add(1);
            id
        }
        .to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolves a ticket with the server's result value.
    pub(crate) async fn complete(&self, id: &str, result: Value) {
        match self.pending.lock().await.remove(id) {
            Some(tx) => {
                let _ = tx.send(Ok(result));
            }
            None => debug!(invocation_id = id, "completion for unknown invocation"),
        }
    }

    /// Resolves a ticket with the server's error string.
    pub(crate) async fn fail(&self, id: &str, error: String) {
        match self.pending.lock().await.remove(id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
            }
            None => debug!(invocation_id = id, "error for unknown invocation"),
        }
    }

    /// Fails every outstanding ticket. Called on hard close.
    pub(crate) async fn close_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(CLOSED_REASON.to_string()));
        }
    }

    /// Drops a ticket without resolving it (timeout or failed send).
    pub(crate) async fn discard(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Handle to an invocation in flight.
///
/// The handle is detached from the connection: it can be awaited from any
/// task. Dropping it abandons the invocation; the eventual completion is then
/// discarded as unknown.
pub struct InvocationHandle {
    id: String,
    rx: oneshot::Receiver<CompletionResult>,
    timeout: Option<Duration>,
    registry: InvocationRegistry,
}

impl InvocationHandle {
    pub(crate) fn new(
        id: String,
        rx: oneshot::Receiver<CompletionResult>,
        timeout: Option<Duration>,
        registry: InvocationRegistry,
    ) -> Self {
        Self {
            id,
            rx,
            timeout,
            registry,
        }
    }

    /// The id this invocation was sent with.
    pub fn invocation_id(&self) -> &str {
        &self.id
    }

    /// Waits for the completion and returns the raw result value.
    ///
    /// A completion carrying an error surfaces as [`SignalRError::Server`];
    /// an elapsed timeout unregisters the ticket and surfaces as
    /// [`SignalRError::InvocationTimeout`].
    pub async fn wait(self) -> Result<Value, SignalRError> {
        let Self {
            id,
            rx,
            timeout,
            registry,
        } = self;

        let completion = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(done) => done,
                Err(_) => {
                    registry.discard(&id).await;
                    return Err(SignalRError::InvocationTimeout);
                }
            },
            None => rx.await,
        };

        match completion {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(server_error)) => Err(SignalRError::Server(server_error)),
            Err(oneshot::Canceled) => Err(SignalRError::ConnectionClosed),
        }
    }

    /// Waits for the completion and deserializes the result.
    pub async fn result<R: DeserializeOwned>(self) -> Result<R, SignalRError> {
        let value = self.wait().await?;
        Ok(serde_json::from_value(value)?)
    }
}
