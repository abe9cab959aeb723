//! A scripted OBS peer on the other end of an in-memory transport.
#![allow(dead_code)]

use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use obsremote::message::{self as m, RequestStatus, hello};
use obsremote::{Client, Codec, CodecKind, ConnectOptions, Identification, IncomingMessage, OutgoingMessage};
use serde_json::Value;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::{Error as WsError, Message};

pub const WAIT: Duration = Duration::from_secs(5);

pub type ClientSink = mpsc::UnboundedSender<Message>;
pub type ClientStream = mpsc::UnboundedReceiver<Result<Message, WsError>>;

pub struct FakeObs {
    codec: Box<dyn Codec>,
    to_client: mpsc::UnboundedSender<Result<Message, WsError>>,
    from_client: mpsc::UnboundedReceiver<Message>,
}

/// Log output for failing tests, filtered by `RUST_LOG`.
pub fn init_tracing() {
    // Another test may have installed it already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn transport(kind: CodecKind) -> (ClientSink, ClientStream, FakeObs) {
    init_tracing();
    let (client_tx, from_client) = mpsc::unbounded();
    let (to_client, client_rx) = mpsc::unbounded();
    let obs = FakeObs {
        codec: kind.codec(),
        to_client,
        from_client,
    };
    (client_tx, client_rx, obs)
}

pub fn hello_message(auth: Option<(&str, &str)>) -> IncomingMessage {
    IncomingMessage::Hello(m::Hello {
        obs_web_socket_version: Some("5.5.4".into()),
        rpc_version: 1,
        authentication: auth.map(|(challenge, salt)| hello::Authentication {
            challenge: challenge.into(),
            salt: salt.into(),
        }),
    })
}

pub fn identified_message() -> IncomingMessage {
    IncomingMessage::Identified(m::Identified {
        negotiated_rpc_version: 1,
    })
}

impl FakeObs {
    pub fn send(&self, message: IncomingMessage) {
        let frame = self.codec.encode_incoming(&message).unwrap();
        self.send_frame(frame);
    }

    pub fn send_frame(&self, frame: Message) {
        // The client may already be gone.
        let _ = self.to_client.unbounded_send(Ok(frame));
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.send_frame(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        })));
    }

    pub fn fail(&self) {
        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let _ = self.to_client.unbounded_send(Err(WsError::Io(error)));
    }

    /// The next frame from the client, or `None` once it closed the transport.
    pub async fn recv_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for the client")
    }

    pub async fn recv(&mut self) -> OutgoingMessage {
        let frame = self.recv_frame().await.expect("client closed the transport");
        self.codec.decode_outgoing(&frame).unwrap()
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv_frame(&mut self) -> Option<Message> {
        self.from_client.next().now_or_never().flatten()
    }

    pub async fn recv_request(&mut self) -> m::Request {
        match self.recv().await {
            OutgoingMessage::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    pub fn respond(&self, request: &m::Request, status: RequestStatus, data: Option<Value>) {
        self.send(IncomingMessage::RequestResponse(m::RequestResponse {
            request_type: request.request_type.clone(),
            request_id: request.request_id.clone(),
            request_status: status,
            response_data: data,
        }));
    }

    /// Plays the server side of Hello / Identify / Identified.
    pub async fn handshake(&mut self, auth: Option<(&str, &str)>) -> m::Identify {
        self.send(hello_message(auth));
        let identify = match self.recv().await {
            OutgoingMessage::Identify(identify) => identify,
            other => panic!("expected Identify, got {other:?}"),
        };
        self.send(identified_message());
        identify
    }
}

/// A client identified with a fresh [`FakeObs`].
pub async fn connected(kind: CodecKind) -> (Client, FakeObs) {
    let (sink, stream, mut obs) = transport(kind);
    let client = Client::new();
    let options = ConnectOptions::new().with_codec(kind);
    let (identification, _) = tokio::join!(
        client.connect_transport(sink, stream, options),
        obs.handshake(None)
    );
    let identification: Identification = identification.unwrap();
    assert_eq!(identification.negotiated_rpc_version, 1);
    (client, obs)
}

/// Polls until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition never became true");
}
