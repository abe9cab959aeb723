use crate::codec::CodecKind;
use crate::connection::{self, Command, ConnectionHandle, Shared};
use crate::error::{Error, Result};
use crate::events::ConnectionEvent;
use crate::message::{BatchRequest, BatchResult, Event};
use crate::state::{ConnectionState, Identification, Machine};

use futures::{Sink, Stream};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use tungstenite::Message as WsMessage;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Only used if the server asks for authentication.
    pub password: Option<String>,
    pub codec: CodecKind,
    /// See [`crate::message::event_subscription`]. `None` leaves the
    /// server default (all non-high-volume events).
    pub event_subscriptions: Option<u32>,
}
impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_password(mut self, password: Option<&str>) -> Self {
        self.password = password.filter(|p| !p.is_empty()).map(str::to_owned);
        self
    }
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }
    pub fn with_event_subscriptions(mut self, event_subscriptions: u32) -> Self {
        self.event_subscriptions = Some(event_subscriptions);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub halt_on_failure: Option<bool>,
    pub execution_type: Option<i32>,
}

/// Holds at most one connection at a time. Every clone talks to the same
/// connection. Event subscriptions survive reconnects.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    shared: Arc<Shared>,
    connection: Mutex<Option<ConnectionHandle>>,
    connecting: AtomicBool,
}

struct ConnectingGuard<'a>(&'a AtomicBool);
impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tears the new connection down if `connect` is dropped mid-handshake.
struct HandshakeGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}
impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(handle) = self.inner.connection.lock().take() {
            debug!("Connect cancelled, closing the transport");
            // Fails only if the task already finished.
            let _ = handle.commands.send(Command::Disconnect);
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Client {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared::new()),
                connection: Mutex::new(None),
                connecting: AtomicBool::new(false),
            }),
        }
    }

    pub async fn connect(&self, origin: &str, password: Option<&str>) -> Result<Identification> {
        self.connect_with(origin, ConnectOptions::new().with_password(password))
            .await
    }

    pub async fn connect_with(&self, origin: &str, options: ConnectOptions) -> Result<Identification> {
        let _guard = self.begin_connect()?;
        let url = Url::parse(origin).map_err(|e| Error::InvalidOrigin(format!("{origin}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidOrigin(format!(
                "{origin}: expected a ws:// or wss:// URL"
            )));
        }
        let protocol = options.codec.protocol();
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));

        debug!(origin, protocol, "Connecting");
        let (ws, response) = async_tungstenite::tokio::connect_async(request).await?;
        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(protocol)
            .to_owned();
        if negotiated != protocol {
            warn!(requested = protocol, %negotiated, "Server picked a different sub-protocol");
        }
        let (sink, stream) = ws.split();
        self.attach(sink, stream, options, negotiated).await
    }

    pub async fn connect_transport<Tx, Rx, E>(
        &self,
        sink: Tx,
        stream: Rx,
        options: ConnectOptions,
    ) -> Result<Identification>
    where
        Tx: Sink<WsMessage> + Unpin + Send + 'static,
        Tx::Error: std::error::Error + Send + Sync + 'static,
        Rx: Stream<Item = std::result::Result<WsMessage, E>> + Unpin + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _guard = self.begin_connect()?;
        let protocol = options.codec.protocol().to_owned();
        self.attach(sink, stream, options, protocol).await
    }

    fn begin_connect(&self) -> Result<ConnectingGuard<'_>> {
        let active = self
            .inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.state() != ConnectionState::Disconnected);
        if active || self.inner.connecting.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyConnected);
        }
        Ok(ConnectingGuard(&self.inner.connecting))
    }

    async fn attach<Tx, Rx, E>(
        &self,
        sink: Tx,
        stream: Rx,
        options: ConnectOptions,
        protocol: String,
    ) -> Result<Identification>
    where
        Tx: Sink<WsMessage> + Unpin + Send + 'static,
        Tx::Error: std::error::Error + Send + Sync + 'static,
        Rx: Stream<Item = std::result::Result<WsMessage, E>> + Unpin + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut machine = Machine::new(options.password, options.event_subscriptions);
        machine.begin_connect();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = connection::spawn(
            sink,
            stream,
            options.codec.codec(),
            machine,
            Arc::clone(&self.inner.shared),
            ready_tx,
            protocol,
        );
        // Replaces a finished connection, if any.
        *self.inner.connection.lock() = Some(handle);
        let mut guard = HandshakeGuard {
            inner: &self.inner,
            armed: true,
        };
        let outcome = ready_rx.await.unwrap_or(Err(Error::ConnectionClosed));
        guard.armed = false;
        outcome
    }

    /// Waits until the connection is torn down. Does nothing when there is
    /// no connection.
    pub async fn disconnect(&self) {
        let handle = self.inner.connection.lock().take();
        let Some(handle) = handle else {
            return;
        };
        // Fails only if the task already finished.
        let _ = handle.commands.send(Command::Disconnect);
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Connection task did not finish cleanly");
        }
    }

    pub fn state(&self) -> ConnectionState {
        let live = self
            .inner
            .connection
            .lock()
            .as_ref()
            .map(ConnectionHandle::state)
            .filter(|state| *state != ConnectionState::Disconnected);
        match live {
            Some(state) => state,
            None if self.inner.connecting.load(Ordering::Acquire) => ConnectionState::Connecting,
            None => ConnectionState::Disconnected,
        }
    }

    pub fn identified(&self) -> bool {
        self.state().is_identified()
    }

    pub fn protocol(&self) -> Option<String> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .map(|handle| handle.protocol.clone())
    }

    fn command(&self, command: Command) -> Result<()> {
        let connection = self.inner.connection.lock();
        match connection.as_ref() {
            Some(handle) if handle.state().is_identified() => handle
                .commands
                .send(command)
                .map_err(|_| Error::NotIdentified),
            _ => Err(Error::NotIdentified),
        }
    }

    /// Fails with [`Error::NotIdentified`] without sending anything unless
    /// the connection is identified.
    pub async fn call(&self, request_type: &str, request_data: Option<Value>) -> Result<Option<Value>> {
        let (responder, response) = oneshot::channel();
        self.command(Command::Call {
            request_type: request_type.to_owned(),
            request_data,
            responder,
        })?;
        response.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    pub async fn call_with_timeout(
        &self,
        request_type: &str,
        request_data: Option<Value>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        tokio::time::timeout(timeout, self.call(request_type, request_data))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    pub async fn call_batch(
        &self,
        requests: Vec<BatchRequest>,
        options: BatchOptions,
    ) -> Result<Vec<BatchResult>> {
        let (responder, response) = oneshot::channel();
        self.command(Command::Batch {
            requests,
            halt_on_failure: options.halt_on_failure,
            execution_type: options.execution_type,
            responder,
        })?;
        response.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    pub async fn reidentify(&self, event_subscriptions: Option<u32>) -> Result<u32> {
        let (responder, response) = oneshot::channel();
        self.command(Command::Reidentify {
            event_subscriptions,
            responder,
        })?;
        response.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    pub fn subscribe(&self, event_type: &str) -> mpsc::UnboundedReceiver<Event> {
        self.inner.shared.listeners.lock().subscribe(event_type)
    }

    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.shared.listeners.lock().subscribe_all()
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.shared.lifecycle.subscribe()
    }
}
