//! The task that owns one connection.
//!
//! All protocol transitions happen on this task, one at a time, so the
//! [`Machine`] needs no locking. Callers reach it through [`Command`]s and get
//! their answers back on per-request oneshot channels.

use crate::codec::Codec;
use crate::error::Error;
use crate::events::{ConnectionEvent, EventListeners};
use crate::message::{BatchRequest, BatchResult};
use crate::state::{ConnectionState, Identification, Machine, Slot, Step};

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use tungstenite::Message as WsMessage;
use tungstenite::protocol::CloseFrame;

type Responder<T> = oneshot::Sender<Result<T, Error>>;

#[derive(Debug)]
pub(crate) enum Pending {
    Call(Responder<Option<Value>>),
    Batch(Responder<Vec<BatchResult>>),
    Reidentify(Responder<u32>),
}
impl Slot for Pending {
    fn is_abandoned(&self) -> bool {
        match self {
            Pending::Call(tx) => tx.is_closed(),
            Pending::Batch(tx) => tx.is_closed(),
            Pending::Reidentify(tx) => tx.is_closed(),
        }
    }
}
impl Pending {
    fn fail(self, error: Error) {
        // The caller may have stopped waiting; nothing to do then.
        match self {
            Pending::Call(tx) => {
                let _ = tx.send(Err(error));
            }
            Pending::Batch(tx) => {
                let _ = tx.send(Err(error));
            }
            Pending::Reidentify(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
    fn mismatch(self, what: &str) {
        self.fail(Error::Protocol(format!("{what} answered a different kind of request")));
    }
}

pub(crate) enum Command {
    Call {
        request_type: String,
        request_data: Option<Value>,
        responder: Responder<Option<Value>>,
    },
    Batch {
        requests: Vec<BatchRequest>,
        halt_on_failure: Option<bool>,
        execution_type: Option<i32>,
        responder: Responder<Vec<BatchResult>>,
    },
    Reidentify {
        event_subscriptions: Option<u32>,
        responder: Responder<u32>,
    },
    Disconnect,
}

/// State that outlives individual connections.
#[derive(Debug)]
pub(crate) struct Shared {
    pub listeners: Mutex<EventListeners>,
    pub lifecycle: broadcast::Sender<ConnectionEvent>,
}
impl Shared {
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(32);
        Self {
            listeners: Mutex::new(EventListeners::default()),
            lifecycle,
        }
    }
    fn notify(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.lifecycle.send(event);
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<ConnectionState>,
    pub protocol: String,
    pub task: JoinHandle<()>,
}
impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

enum Closure {
    Requested,
    Peer(Option<CloseFrame>),
    Ended,
    Transport(Error),
    Violation(Error),
}

/// Starts the connection task on an already opened transport.
///
/// `ready` resolves once the handshake finishes, or with the error that ended
/// the connection before that.
pub(crate) fn spawn<Tx, Rx, E>(
    sink: Tx,
    stream: Rx,
    codec: Box<dyn Codec>,
    machine: Machine<Pending>,
    shared: Arc<Shared>,
    ready: oneshot::Sender<Result<Identification, Error>>,
    protocol: String,
) -> ConnectionHandle
where
    Tx: Sink<WsMessage> + Unpin + Send + 'static,
    Tx::Error: std::error::Error + Send + Sync + 'static,
    Rx: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(machine.state());
    let event_loop = EventLoop {
        sink,
        codec,
        machine,
        shared,
        state: state_tx,
        ready: Some(ready),
    };
    let task = tokio::spawn(event_loop.run(stream, commands_rx));
    ConnectionHandle {
        commands: commands_tx,
        state: state_rx,
        protocol,
        task,
    }
}

struct EventLoop<Tx> {
    sink: Tx,
    codec: Box<dyn Codec>,
    machine: Machine<Pending>,
    shared: Arc<Shared>,
    state: watch::Sender<ConnectionState>,
    ready: Option<oneshot::Sender<Result<Identification, Error>>>,
}

impl<Tx> EventLoop<Tx>
where
    Tx: Sink<WsMessage> + Unpin + Send + 'static,
    Tx::Error: std::error::Error + Send + Sync + 'static,
{
    async fn run<Rx, E>(mut self, mut stream: Rx, mut commands: mpsc::UnboundedReceiver<Command>)
    where
        Rx: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.machine.transport_opened();
        self.publish();
        self.shared.notify(ConnectionEvent::Opened);
        debug!(protocol = self.codec.protocol(), "Transport open, awaiting Hello");

        let closure = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(closure) = self.on_frame(frame).await {
                            break closure;
                        }
                    }
                    Some(Err(e)) => break Closure::Transport(Error::transport(e)),
                    None => break Closure::Ended,
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(closure) = self.on_command(command).await {
                            break closure;
                        }
                    }
                    // Every handle is gone.
                    None => break Closure::Requested,
                },
            }
        };
        self.shutdown(closure).await;
    }

    async fn on_frame(&mut self, frame: WsMessage) -> Result<(), Closure> {
        let message = match &frame {
            WsMessage::Close(close) => return Err(Closure::Peer(close.clone())),
            WsMessage::Text(_) | WsMessage::Binary(_) => self.codec.decode(&frame),
            // Ping/pong are answered by tungstenite.
            _ => return Ok(()),
        };
        let message = match message {
            Ok(message) => message,
            Err(e) if self.machine.is_handshaking() => {
                return Err(Closure::Violation(Error::Handshake {
                    close_code: None,
                    reason: format!("undecodable handshake message ({e})"),
                }));
            }
            Err(e) => {
                let slot = e
                    .response_to()
                    .and_then(|request_id| self.machine.take_undecodable(request_id));
                if let Some(slot) = slot {
                    warn!(error = %e, "Failed to decode response");
                    slot.fail(e.into());
                    return Ok(());
                }
                warn!(error = %e, "Failed to decode incoming message");
                self.shared.notify(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                return Ok(());
            }
        };
        trace!(op = message.opcode(), "Received message");

        match self.machine.handle(message) {
            Step::SendIdentify(identify) => {
                self.publish();
                self.shared.notify(ConnectionEvent::Hello);
                let frame = self
                    .codec
                    .encode(&identify)
                    .map_err(|e| Closure::Violation(e.into()))?;
                self.write(frame).await?;
            }
            Step::Identified(identification) => {
                debug!(
                    negotiated_rpc_version = identification.negotiated_rpc_version,
                    "Identified"
                );
                self.publish();
                self.shared.notify(ConnectionEvent::Identified {
                    negotiated_rpc_version: identification.negotiated_rpc_version,
                });
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(identification));
                }
            }
            Step::Reidentified {
                slot,
                negotiated_rpc_version,
            } => match slot {
                Pending::Reidentify(tx) => {
                    let _ = tx.send(Ok(negotiated_rpc_version));
                }
                other => other.mismatch("Identified"),
            },
            Step::Response { pending, result } => {
                trace!(
                    request_type = %pending.request_type,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Request resolved"
                );
                match pending.slot {
                    Pending::Call(tx) => {
                        let _ = tx.send(result);
                    }
                    other => other.mismatch("RequestResponse"),
                }
            }
            Step::BatchResponse { pending, results } => {
                trace!(
                    results = results.len(),
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "Batch resolved"
                );
                match pending.slot {
                    Pending::Batch(tx) => {
                        let _ = tx.send(Ok(results));
                    }
                    other => other.mismatch("RequestBatchResponse"),
                }
            }
            Step::Event(event) => {
                let delivered = self.shared.listeners.lock().dispatch(&event);
                trace!(event_type = %event.event_type, delivered, "Event dispatched");
            }
            Step::Ignore => {}
            Step::Violation(e) => return Err(Closure::Violation(e)),
        }
        Ok(())
    }

    async fn on_command(&mut self, command: Command) -> Result<(), Closure> {
        let admitted = match command {
            Command::Call {
                request_type,
                request_data,
                responder,
            } => self
                .machine
                .request(&request_type, request_data, Pending::Call(responder)),
            Command::Batch {
                requests,
                halt_on_failure,
                execution_type,
                responder,
            } => self.machine.request_batch(
                requests,
                halt_on_failure,
                execution_type,
                Pending::Batch(responder),
            ),
            Command::Reidentify {
                event_subscriptions,
                responder,
            } => self
                .machine
                .reidentify(event_subscriptions, Pending::Reidentify(responder)),
            Command::Disconnect => return Err(Closure::Requested),
        };
        let message = match admitted {
            Ok(message) => message,
            Err((e, slot)) => {
                slot.fail(e);
                return Ok(());
            }
        };
        match self.codec.encode(&message) {
            Ok(frame) => {
                self.write(frame).await?;
                trace!(
                    op = message.opcode(),
                    pending = self.machine.pending_count(),
                    "Message sent"
                );
                Ok(())
            }
            Err(e) => {
                if let Some(slot) = self.machine.withdraw(&message) {
                    slot.fail(e.into());
                }
                Ok(())
            }
        }
    }

    async fn write(&mut self, frame: WsMessage) -> Result<(), Closure> {
        self.sink
            .send(frame)
            .await
            .map_err(|e| Closure::Transport(Error::transport(e)))
    }

    fn publish(&self) {
        self.state.send_replace(self.machine.state());
    }

    async fn shutdown(mut self, closure: Closure) {
        let was_handshaking = self.machine.is_handshaking();
        self.machine.begin_close();
        self.publish();

        let (code, reason, outcome) = match closure {
            Closure::Requested => {
                debug!("Disconnect requested");
                (None, "disconnected".to_owned(), Error::ConnectionClosed)
            }
            Closure::Peer(close) => {
                let (code, reason) = match close {
                    Some(close) => (Some(u16::from(close.code)), close.reason.as_str().to_owned()),
                    None => (None, String::new()),
                };
                debug!(?code, %reason, "WebSocket closed by remote");
                let outcome = if was_handshaking {
                    Error::Handshake {
                        close_code: code,
                        reason: reason.clone(),
                    }
                } else {
                    Error::ConnectionClosed
                };
                (code, reason, outcome)
            }
            Closure::Ended => {
                debug!("WebSocket stream ended");
                let outcome = if was_handshaking {
                    Error::Handshake {
                        close_code: None,
                        reason: "connection ended during handshake".to_owned(),
                    }
                } else {
                    Error::ConnectionClosed
                };
                (None, "connection ended".to_owned(), outcome)
            }
            Closure::Transport(e) => {
                error!(error = %e, "WebSocket error");
                (None, e.to_string(), e)
            }
            Closure::Violation(e) => {
                warn!(error = %e, "Protocol violation, closing");
                (None, e.to_string(), e)
            }
        };

        if !matches!(outcome, Error::Transport(_))
            && let Err(e) = self.sink.close().await
        {
            debug!(error = %e, "Failed to close transport cleanly");
        }

        let pending = self.machine.closed();
        self.publish();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failed pending requests on shutdown");
        }
        for slot in pending {
            slot.fail(Error::ConnectionClosed);
        }
        self.shared.notify(ConnectionEvent::Closed { code, reason });
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(outcome));
        }
        debug!("Connection task finished");
    }
}
