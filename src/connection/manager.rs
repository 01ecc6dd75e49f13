//! Connection lifecycle control.
//!
//! [`ConnectionManager`] coordinates everything that can mutate the
//! connection state: the caller-facing operations (`start`, `stop`, sends and
//! invokes), the reader task that pumps inbound records, the keep-alive and
//! server-watchdog timers, and the reconnect schedule.
//!
//! Close paths race against each other (a caller stopping, the watchdog
//! firing, the server sending a close record, the transport dropping). The
//! state lock arbitrates: whoever flips the state away from `Connected`
//! first runs the teardown and fires the events; everyone else backs off.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::config::{HubConfig, InvokeTimeout};
use crate::connection::events::LifecycleEvents;
use crate::connection::handlers::{HandlerTable, InvocationArguments};
use crate::connection::liveness::Liveness;
use crate::connection::registry::{InvocationHandle, InvocationRegistry};
use crate::connection::{Connection, ConnectionState, WsReader};
use crate::error::SignalRError;
use crate::protocol::{JsonCodec, Message, PING};

/// Offsets of the reconnect attempts, measured from the trigger.
const RECONNECT_SCHEDULE: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

struct CloseDirective {
    error: Option<String>,
    allow_reconnect: bool,
}

enum ReadOutcome {
    /// The server sent a close record.
    ServerClose(CloseDirective),
    /// The transport ended without a close record.
    TransportClosed { reason: Option<String> },
}

/// Which party runs a teardown. The initiator's own task is left to finish
/// on its own instead of being aborted mid-teardown.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Teardown {
    ByCaller,
    ByReader,
    ByWatchdog,
}

#[derive(Default)]
struct SessionTasks {
    reader: Option<JoinHandle<()>>,
    keep_alive: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

struct Inner {
    config: HubConfig,
    state: RwLock<ConnectionState>,
    registry: InvocationRegistry,
    handlers: HandlerTable,
    events: LifecycleEvents,
    liveness: Liveness,
    writer: Mutex<Option<Connection>>,
    tasks: Mutex<SessionTasks>,
}

/// Manages the lifecycle of a hub connection.
#[derive(Clone)]
pub(crate) struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub(crate) fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                registry: InvocationRegistry::new(),
                handlers: HandlerTable::new(),
                events: LifecycleEvents::new(),
                liveness: Liveness::new(),
                writer: Mutex::new(None),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        }
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub(crate) async fn pending_invocations(&self) -> usize {
        self.inner.registry.pending_count().await
    }

    /// Connects and performs the handshake, blocking the caller until the
    /// connection is ready or the attempt fails.
    ///
    /// A call while not disconnected is logged and ignored.
    pub(crate) async fn start(&self) -> Result<(), SignalRError> {
        {
            let mut state = self.inner.state.write().await;
            if *state != ConnectionState::Disconnected {
                error!(state = ?*state, "start called while not disconnected; ignoring");
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        match Connection::establish(&self.inner.config).await {
            Ok((connection, reader, leftover)) => {
                if !install_session(&self.inner, connection, Some((reader, leftover))).await {
                    return Err(SignalRError::ConnectionClosed);
                }
                Ok(())
            }
            Err(e) => self.handle_start_failure(e).await,
        }
    }

    async fn handle_start_failure(&self, e: SignalRError) -> Result<(), SignalRError> {
        let inner = &self.inner;
        {
            // A concurrent stop may have ended the attempt already.
            let mut state = inner.state.write().await;
            if *state != ConnectionState::Connecting {
                return Err(e);
            }
            *state = if inner.config.reconnect {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
        }

        if inner.config.reconnect {
            warn!(error = %e, "connection attempt failed; entering reconnect");
            inner.events.fire_reconnecting(Some(e.to_string())).await;
            let loop_inner = Arc::clone(inner);
            let handle = tokio::spawn(async move {
                if let Some((reader, leftover)) = run_reconnect_schedule(&loop_inner).await {
                    read_loop(loop_inner, reader, leftover).await;
                }
            });
            inner.tasks.lock().await.reader = Some(handle);
            return Err(e);
        }

        match &e {
            SignalRError::HandshakeFailed(reason) => error!(reason = %reason, "handshake failed"),
            SignalRError::HandshakeTimeout => error!("handshake timed out"),
            SignalRError::Protocol(reason) => error!(reason = %reason, "handshake reply was malformed"),
            _ => {
                // Transport-level failure surfaces through the Closed event.
                inner.events.fire_closed(Some(e.to_string())).await;
            }
        }
        Err(e)
    }

    /// Sends the close record and tears the connection down.
    ///
    /// A no-op when already disconnected; never triggers reconnect.
    pub(crate) async fn stop(&self, error: Option<String>) -> Result<(), SignalRError> {
        let record = JsonCodec::encode_close(error.as_deref())?;
        if !close_session(
            &self.inner,
            ConnectionState::Disconnected,
            false,
            Teardown::ByCaller,
            Some(record),
        )
        .await
        {
            debug!("stop called while already disconnected");
            return Ok(());
        }
        info!("hub connection stopped");
        self.inner.events.fire_closed(error).await;
        Ok(())
    }

    /// Fire-and-forget invocation: empty invocation id, no ticket.
    pub(crate) async fn send(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), SignalRError> {
        let record = JsonCodec::encode_invocation("", target, &arguments)?;
        send_frame(&self.inner, record).await
    }

    /// Invocation expecting a completion; the ticket is registered before
    /// the record reaches the wire.
    pub(crate) async fn invoke_detached(
        &self,
        target: &str,
        arguments: Vec<Value>,
        timeout: InvokeTimeout,
    ) -> Result<InvocationHandle, SignalRError> {
        let limit = timeout.resolve(self.inner.config.server_timeout);
        let (id, rx) = self.inner.registry.begin().await;
        let record = JsonCodec::encode_invocation(&id, target, &arguments)?;
        if let Err(e) = send_frame(&self.inner, record).await {
            self.inner.registry.discard(&id).await;
            return Err(e);
        }
        Ok(InvocationHandle::new(
            id,
            rx,
            limit,
            self.inner.registry.clone(),
        ))
    }

    pub(crate) async fn invoke<R: DeserializeOwned>(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<R, SignalRError> {
        self.invoke_detached(target, arguments, InvokeTimeout::ServerTimeout)
            .await?
            .result()
            .await
    }

    pub(crate) async fn on<A, F>(&self, target: &str, handler: F)
    where
        A: InvocationArguments + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.inner.handlers.register(target, handler).await;
    }

    pub(crate) async fn on_closed<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.inner.events.set_closed(callback).await;
    }

    pub(crate) async fn on_reconnecting<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.inner.events.set_reconnecting(callback).await;
    }

    pub(crate) async fn on_reconnected<F>(&self, callback: F)
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.inner.events.set_reconnected(callback).await;
    }
}

/// Installs an established connection under the state lock: writer, reader
/// task (when this is a fresh start rather than an in-place reconnect),
/// timers, `Connected` state.
///
/// Refuses when the state is no longer `Connecting`/`Reconnecting` (a
/// concurrent stop won the race); the fresh connection is closed instead.
async fn install_session(
    inner: &Arc<Inner>,
    mut connection: Connection,
    reader: Option<(WsReader, Vec<Message>)>,
) -> bool {
    let mut state = inner.state.write().await;
    if !matches!(
        *state,
        ConnectionState::Connecting | ConnectionState::Reconnecting
    ) {
        drop(state);
        connection.close().await;
        return false;
    }
    inner.liveness.reset().await;
    *inner.writer.lock().await = Some(connection);
    {
        let mut tasks = inner.tasks.lock().await;
        if let Some((reader, leftover)) = reader {
            tasks.reader = Some(tokio::spawn(read_loop(Arc::clone(inner), reader, leftover)));
        }
        tasks.keep_alive = Some(tokio::spawn(keep_alive_loop(Arc::clone(inner))));
        tasks.watchdog = Some(tokio::spawn(watchdog_loop(Arc::clone(inner))));
    }
    *state = ConnectionState::Connected;
    true
}

/// Runs a close transition and the hard-close teardown under the state
/// lock: flip the state, optionally send a close record, detach the other
/// session tasks, close the transport, fail every outstanding ticket.
///
/// Returns false when another close path already won (or, for the
/// watchdog, when the state is not `Connected`). Events are the caller's
/// business, fired after the lock is gone.
async fn close_session(
    inner: &Arc<Inner>,
    next: ConnectionState,
    only_if_connected: bool,
    initiator: Teardown,
    close_record: Option<Vec<u8>>,
) -> bool {
    let mut state = inner.state.write().await;
    let allowed = if only_if_connected {
        *state == ConnectionState::Connected
    } else {
        *state != ConnectionState::Disconnected
    };
    if !allowed {
        return false;
    }
    *state = next;

    if let Some(record) = close_record {
        let mut writer = inner.writer.lock().await;
        if let Some(connection) = writer.as_mut() {
            if let Err(e) = connection.send_record(record).await {
                debug!(error = %e, "failed to send close record");
            }
        }
    }

    {
        let mut tasks = inner.tasks.lock().await;
        if initiator != Teardown::ByReader {
            if let Some(handle) = tasks.reader.take() {
                handle.abort();
            }
        }
        if let Some(handle) = tasks.keep_alive.take() {
            handle.abort();
        }
        match tasks.watchdog.take() {
            Some(handle) if initiator != Teardown::ByWatchdog => handle.abort(),
            _ => {}
        }
    }
    if let Some(mut connection) = inner.writer.lock().await.take() {
        connection.close().await;
    }
    inner.registry.close_all().await;
    true
}

/// Sends one record over the current transport and resets the keep-alive
/// clock once the send has returned.
async fn send_frame(inner: &Inner, record: Vec<u8>) -> Result<(), SignalRError> {
    let mut writer = inner.writer.lock().await;
    match writer.as_mut() {
        Some(connection) => {
            connection.send_record(record).await?;
            drop(writer);
            inner.liveness.touch_outbound().await;
            Ok(())
        }
        None => {
            warn!("transport is not open; message discarded");
            Err(SignalRError::NotConnected)
        }
    }
}

/// Reader task: dispatches inbound records and drives close/reconnect.
///
/// `leftover` holds records that shared a transport message with the
/// handshake reply; they take the normal dispatch path first.
fn read_loop(
    inner: Arc<Inner>,
    mut reader: WsReader,
    leftover: Vec<Message>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut pending = leftover;
        loop {
            let outcome = match drain_messages(&inner, std::mem::take(&mut pending)).await {
                Some(directive) => ReadOutcome::ServerClose(directive),
                None => pump(&inner, &mut reader).await,
            };

            match outcome {
                ReadOutcome::ServerClose(directive)
                    if directive.allow_reconnect && inner.config.reconnect =>
                {
                    if !prepare_reconnect(&inner, directive.error).await {
                        return;
                    }
                    match run_reconnect_schedule(&inner).await {
                        Some((next_reader, next_leftover)) => {
                            reader = next_reader;
                            pending = next_leftover;
                        }
                        None => return,
                    }
                }
                ReadOutcome::ServerClose(directive) => {
                    finalize_close(&inner, directive.error).await;
                    return;
                }
                ReadOutcome::TransportClosed { reason } => {
                    finalize_close(&inner, reason).await;
                    return;
                }
            }
        }
    })
}

/// Pumps transport messages until one of the close conditions occurs.
async fn pump(inner: &Arc<Inner>, reader: &mut WsReader) -> ReadOutcome {
    while let Some(message) = reader.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                if let Some(directive) = dispatch_payload(inner, text.as_bytes()).await {
                    return ReadOutcome::ServerClose(directive);
                }
            }
            Ok(WsMessage::Binary(_)) => warn!("ignoring binary frame"),
            Ok(WsMessage::Close(frame)) => {
                info!("transport closed by server");
                return ReadOutcome::TransportClosed {
                    reason: frame
                        .map(|f| f.reason.to_string())
                        .filter(|reason| !reason.is_empty()),
                };
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "websocket error");
                return ReadOutcome::TransportClosed {
                    reason: Some(e.to_string()),
                };
            }
        }
    }
    ReadOutcome::TransportClosed { reason: None }
}

/// Splits a transport payload and dispatches every record, in order. The
/// watchdog clock is reset only after the whole payload has been processed.
async fn dispatch_payload(inner: &Arc<Inner>, payload: &[u8]) -> Option<CloseDirective> {
    let mut close = None;
    for record in JsonCodec::split_records(payload) {
        match JsonCodec::parse(record) {
            Ok(message) => {
                if let Some(directive) = dispatch_record(inner, message).await {
                    close = Some(directive);
                }
            }
            Err(e) => warn!(error = %e, "failed to parse SignalR record"),
        }
    }
    inner.liveness.touch_inbound().await;
    close
}

async fn drain_messages(inner: &Arc<Inner>, messages: Vec<Message>) -> Option<CloseDirective> {
    let mut close = None;
    for message in messages {
        if let Some(directive) = dispatch_record(inner, message).await {
            close = Some(directive);
        }
    }
    close
}

async fn dispatch_record(inner: &Arc<Inner>, message: Message) -> Option<CloseDirective> {
    match message {
        Message::Invocation {
            target, arguments, ..
        } => {
            debug!(method = %target, "invocation received");
            inner.handlers.dispatch(&target, arguments).await;
        }
        Message::Completion {
            invocation_id,
            result,
            error,
        } => {
            debug!(invocation_id = %invocation_id, "completion received");
            match error {
                Some(error) => inner.registry.fail(&invocation_id, error).await,
                None => {
                    inner
                        .registry
                        .complete(&invocation_id, result.unwrap_or(Value::Null))
                        .await
                }
            }
        }
        Message::Ping => debug!("ping received"),
        Message::Close {
            error,
            allow_reconnect,
        } => {
            info!(allow_reconnect, "close received from server");
            return Some(CloseDirective {
                error,
                allow_reconnect,
            });
        }
        Message::StreamItem { invocation_id }
        | Message::StreamInvocation { invocation_id }
        | Message::CancelInvocation { invocation_id } => {
            debug!(
                invocation_id = ?invocation_id,
                "streaming message ignored (streaming is not supported)"
            );
        }
    }
    None
}

/// Transitions into reconnect mode: state, teardown, `Reconnecting` event.
async fn prepare_reconnect(inner: &Arc<Inner>, error: Option<String>) -> bool {
    if !close_session(
        inner,
        ConnectionState::Reconnecting,
        true,
        Teardown::ByReader,
        None,
    )
    .await
    {
        return false;
    }
    info!("connection lost; reconnecting");
    inner.events.fire_reconnecting(error).await;
    true
}

/// Final close: state, teardown, `Closed` event. Skipped entirely when
/// another close path already ran.
async fn finalize_close(inner: &Arc<Inner>, reason: Option<String>) {
    if !close_session(
        inner,
        ConnectionState::Disconnected,
        false,
        Teardown::ByReader,
        None,
    )
    .await
    {
        return;
    }
    inner.events.fire_closed(reason).await;
}

/// Runs the fixed reconnect schedule. Returns the new reader on success;
/// `None` when the schedule is exhausted or the client was stopped.
async fn run_reconnect_schedule(inner: &Arc<Inner>) -> Option<(WsReader, Vec<Message>)> {
    let trigger = Instant::now();
    let mut last_error = String::new();

    for (attempt, offset) in RECONNECT_SCHEDULE.iter().enumerate() {
        tokio::time::sleep_until(trigger + *offset).await;
        if *inner.state.read().await != ConnectionState::Reconnecting {
            return None;
        }
        info!(attempt = attempt + 1, "reconnect attempt");
        match Connection::establish(&inner.config).await {
            Ok((connection, reader, leftover)) => {
                if !install_session(inner, connection, None).await {
                    return None;
                }
                info!("reconnected");
                inner.events.fire_reconnected(None).await;
                return Some((reader, leftover));
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                last_error = e.to_string();
            }
        }
    }

    {
        let mut state = inner.state.write().await;
        if *state != ConnectionState::Reconnecting {
            return None;
        }
        *state = ConnectionState::Disconnected;
    }
    inner
        .events
        .fire_closed(Some(format!("Reconnect failed with message: {last_error}")))
        .await;
    None
}

/// Sends a ping whenever the keep-alive interval elapses without outbound
/// traffic. Any send resets the clock, so busy connections never ping.
async fn keep_alive_loop(inner: Arc<Inner>) {
    let interval = inner.config.keep_alive_interval;
    loop {
        let deadline = inner.liveness.outbound_deadline(interval).await;
        if Instant::now() >= deadline {
            debug!("sending keep-alive ping");
            if send_frame(&inner, PING.to_vec()).await.is_err() {
                return;
            }
        } else {
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Declares the server dead after `server_timeout` of inbound silence.
async fn watchdog_loop(inner: Arc<Inner>) {
    let timeout = inner.config.server_timeout;
    loop {
        let deadline = inner.liveness.inbound_deadline(timeout).await;
        if Instant::now() >= deadline {
            if close_session(
                &inner,
                ConnectionState::Disconnected,
                true,
                Teardown::ByWatchdog,
                None,
            )
            .await
            {
                warn!("server timed out");
                inner
                    .events
                    .fire_closed(Some("server timed out".to_string()))
                    .await;
            }
            return;
        }
        tokio::time::sleep_until(deadline).await;
    }
}
