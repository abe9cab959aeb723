use crate::auth::derive_auth_response;
use crate::error::Error;
use crate::message::{
    self as m, BatchRequest, BatchResult, Event, IncomingMessage, OutgoingMessage, RPC_VERSION,
};

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingHello,
    AwaitingIdentified,
    Identified,
    Closing,
}
impl ConnectionState {
    pub fn is_identified(self) -> bool {
        matches!(self, ConnectionState::Identified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub obs_web_socket_version: Option<String>,
    pub negotiated_rpc_version: u32,
}

pub(crate) trait Slot {
    /// The caller stopped waiting.
    fn is_abandoned(&self) -> bool;
}

#[derive(Debug)]
pub(crate) struct PendingRequest<S> {
    pub slot: S,
    pub request_type: String,
    pub created_at: Instant,
}

#[derive(Debug)]
pub(crate) struct PendingTable<S> {
    entries: HashMap<String, PendingRequest<S>>,
    next_id: u64,
}
impl<S: Slot> PendingTable<S> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
        }
    }
    fn generate_id(&mut self) -> String {
        loop {
            let id = format!("{:016x}", self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.entries.contains_key(&id) {
                break id;
            }
        }
    }
    fn insert(&mut self, slot: S, request_type: &str) -> String {
        let id = self.generate_id();
        self.entries.insert(
            id.clone(),
            PendingRequest {
                slot,
                request_type: request_type.to_owned(),
                created_at: Instant::now(),
            },
        );
        id
    }
    fn take(&mut self, request_id: &str) -> Option<PendingRequest<S>> {
        self.entries.remove(request_id)
    }
    fn prune_abandoned(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| !pending.slot.is_abandoned());
        before - self.entries.len()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug)]
pub(crate) enum Step<S> {
    /// `Hello` was accepted; this `Identify` must be sent.
    SendIdentify(OutgoingMessage),
    Identified(Identification),
    Reidentified {
        slot: S,
        negotiated_rpc_version: u32,
    },
    Response {
        pending: PendingRequest<S>,
        result: Result<Option<Value>, Error>,
    },
    BatchResponse {
        pending: PendingRequest<S>,
        results: Vec<BatchResult>,
    },
    Event(Event),
    Ignore,
    /// The connection must be torn down.
    Violation(Error),
}

/// The OBS WebSocket protocol without any I/O. The caller carries out the
/// returned [`Step`]s.
#[derive(Debug)]
pub(crate) struct Machine<S> {
    state: ConnectionState,
    password: Option<String>,
    event_subscriptions: Option<u32>,
    obs_web_socket_version: Option<String>,
    pending: PendingTable<S>,
    reidentify: VecDeque<S>,
}
impl<S: Slot> Machine<S> {
    pub fn new(password: Option<String>, event_subscriptions: Option<u32>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            password,
            event_subscriptions,
            obs_web_socket_version: None,
            pending: PendingTable::new(),
            reidentify: VecDeque::new(),
        }
    }
    pub fn state(&self) -> ConnectionState {
        self.state
    }
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
    pub fn begin_connect(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Disconnected);
        self.state = ConnectionState::Connecting;
    }
    pub fn transport_opened(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        self.state = ConnectionState::AwaitingHello;
    }
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::AwaitingHello
                | ConnectionState::AwaitingIdentified
        )
    }

    pub fn handle(&mut self, message: IncomingMessage) -> Step<S> {
        match message {
            IncomingMessage::Hello(hello) => self.on_hello(hello),
            IncomingMessage::Identified(identified) => self.on_identified(identified),
            IncomingMessage::RequestResponse(response) => {
                let Some(pending) = self.take_pending(&response.request_id) else {
                    return Step::Ignore;
                };
                let status = response.request_status;
                let result = if status.result {
                    Ok(response.response_data)
                } else {
                    Err(Error::Request {
                        request_id: response.request_id,
                        request_type: response.request_type,
                        code: status.code,
                        comment: status.comment,
                    })
                };
                Step::Response { pending, result }
            }
            IncomingMessage::RequestBatchResponse(response) => {
                match self.take_pending(&response.request_id) {
                    Some(pending) => Step::BatchResponse {
                        pending,
                        results: response.results,
                    },
                    None => Step::Ignore,
                }
            }
            IncomingMessage::Event(event) => Step::Event(event),
            IncomingMessage::Unrecognized { op, .. } => {
                debug!(op, "Ignoring message with unknown opcode");
                Step::Ignore
            }
        }
    }

    fn on_hello(&mut self, hello: m::Hello) -> Step<S> {
        if self.state != ConnectionState::AwaitingHello {
            return Step::Violation(Error::Handshake {
                close_code: None,
                reason: format!("unexpected Hello while {:?}", self.state),
            });
        }
        let authentication = hello.authentication.map(|auth| {
            derive_auth_response(
                self.password.as_deref().unwrap_or(""),
                &auth.challenge,
                &auth.salt,
            )
        });
        debug!(
            obs_web_socket_version = hello.obs_web_socket_version.as_deref(),
            rpc_version = hello.rpc_version,
            authenticated = authentication.is_some(),
            "Received Hello"
        );
        self.obs_web_socket_version = hello.obs_web_socket_version;
        self.state = ConnectionState::AwaitingIdentified;
        Step::SendIdentify(OutgoingMessage::Identify(m::Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: self.event_subscriptions,
        }))
    }

    fn on_identified(&mut self, identified: m::Identified) -> Step<S> {
        let queued = match self.state {
            ConnectionState::Identified => self.reidentify.pop_front(),
            _ => None,
        };
        match (self.state, queued) {
            (ConnectionState::AwaitingIdentified, _) => {
                self.state = ConnectionState::Identified;
                Step::Identified(Identification {
                    obs_web_socket_version: self.obs_web_socket_version.clone(),
                    negotiated_rpc_version: identified.negotiated_rpc_version,
                })
            }
            // Answer to a Reidentify.
            (ConnectionState::Identified, Some(slot)) => Step::Reidentified {
                slot,
                negotiated_rpc_version: identified.negotiated_rpc_version,
            },
            (state, _) => Step::Violation(Error::Handshake {
                close_code: None,
                reason: format!("unexpected Identified while {state:?}"),
            }),
        }
    }

    pub fn take_undecodable(&mut self, request_id: &str) -> Option<S> {
        self.take_pending(request_id).map(|pending| pending.slot)
    }

    fn take_pending(&mut self, request_id: &str) -> Option<PendingRequest<S>> {
        match self.pending.take(request_id) {
            Some(pending) if pending.slot.is_abandoned() => {
                debug!(request_id, "Dropping response to abandoned request");
                None
            }
            Some(pending) => Some(pending),
            None => {
                warn!(request_id, "Response for unknown request");
                None
            }
        }
    }

    fn admit(&mut self, slot: S, request_type: &str) -> Result<String, (Error, S)> {
        if !self.state.is_identified() {
            return Err((Error::NotIdentified, slot));
        }
        let pruned = self.pending.prune_abandoned();
        if pruned > 0 {
            debug!(pruned, "Pruned abandoned requests");
        }
        Ok(self.pending.insert(slot, request_type))
    }

    /// Registers a request. Fails with [`Error::NotIdentified`], handing the
    /// slot back, unless the connection is identified.
    pub fn request(
        &mut self,
        request_type: &str,
        request_data: Option<Value>,
        slot: S,
    ) -> Result<OutgoingMessage, (Error, S)> {
        let request_id = self.admit(slot, request_type)?;
        Ok(OutgoingMessage::Request(m::Request {
            request_type: request_type.to_owned(),
            request_id,
            request_data,
        }))
    }

    pub fn request_batch(
        &mut self,
        requests: Vec<BatchRequest>,
        halt_on_failure: Option<bool>,
        execution_type: Option<i32>,
        slot: S,
    ) -> Result<OutgoingMessage, (Error, S)> {
        let request_id = self.admit(slot, "RequestBatch")?;
        Ok(OutgoingMessage::RequestBatch(m::RequestBatch {
            request_id,
            halt_on_failure,
            execution_type,
            requests,
        }))
    }

    pub fn reidentify(
        &mut self,
        event_subscriptions: Option<u32>,
        slot: S,
    ) -> Result<OutgoingMessage, (Error, S)> {
        if !self.state.is_identified() {
            return Err((Error::NotIdentified, slot));
        }
        self.reidentify.push_back(slot);
        self.event_subscriptions = event_subscriptions;
        Ok(OutgoingMessage::Reidentify(m::Reidentify {
            event_subscriptions,
        }))
    }

    /// Withdraws a message that was admitted but never made it onto the wire.
    pub fn withdraw(&mut self, message: &OutgoingMessage) -> Option<S> {
        match message {
            OutgoingMessage::Request(m::Request { request_id, .. })
            | OutgoingMessage::RequestBatch(m::RequestBatch { request_id, .. }) => {
                self.pending.take(request_id).map(|pending| pending.slot)
            }
            OutgoingMessage::Reidentify(_) => self.reidentify.pop_back(),
            OutgoingMessage::Identify(_) => None,
        }
    }

    pub fn begin_close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Closing;
        }
    }

    /// Final transition. Returns every slot still waiting for an answer.
    pub fn closed(&mut self) -> Vec<S> {
        self.state = ConnectionState::Disconnected;
        let mut slots: Vec<S> = self
            .pending
            .entries
            .drain()
            .map(|(_, pending)| pending.slot)
            .collect();
        slots.extend(self.reidentify.drain(..));
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RequestResponse, RequestStatus, hello};
    use crate::status;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Default)]
    struct TestSlot {
        abandoned: Rc<Cell<bool>>,
        tag: &'static str,
    }
    impl TestSlot {
        fn tagged(tag: &'static str) -> Self {
            Self {
                tag,
                ..Default::default()
            }
        }
    }
    impl Slot for TestSlot {
        fn is_abandoned(&self) -> bool {
            self.abandoned.get()
        }
    }

    fn hello(auth: Option<(&str, &str)>) -> IncomingMessage {
        IncomingMessage::Hello(m::Hello {
            obs_web_socket_version: Some("5.5.4".into()),
            rpc_version: 1,
            authentication: auth.map(|(challenge, salt)| hello::Authentication {
                challenge: challenge.into(),
                salt: salt.into(),
            }),
        })
    }

    fn identified() -> IncomingMessage {
        IncomingMessage::Identified(m::Identified {
            negotiated_rpc_version: 1,
        })
    }

    fn response(request_id: &str, status: RequestStatus, data: Option<Value>) -> IncomingMessage {
        IncomingMessage::RequestResponse(RequestResponse {
            request_type: "GetVersion".into(),
            request_id: request_id.into(),
            request_status: status,
            response_data: data,
        })
    }

    fn open(password: Option<&str>) -> Machine<TestSlot> {
        let mut machine = Machine::new(password.map(str::to_owned), None);
        machine.begin_connect();
        machine.transport_opened();
        machine
    }

    fn identified_machine() -> Machine<TestSlot> {
        let mut machine = open(None);
        assert!(matches!(machine.handle(hello(None)), Step::SendIdentify(_)));
        assert!(matches!(machine.handle(identified()), Step::Identified(_)));
        machine
    }

    fn request_id(message: &OutgoingMessage) -> String {
        match message {
            OutgoingMessage::Request(request) => request.request_id.clone(),
            OutgoingMessage::RequestBatch(batch) => batch.request_id.clone(),
            other => panic!("not a request: {other:?}"),
        }
    }

    #[test]
    fn handshake_with_authentication() {
        let mut machine = open(Some("secret"));
        assert_eq!(machine.state(), ConnectionState::AwaitingHello);
        let Step::SendIdentify(OutgoingMessage::Identify(identify)) =
            machine.handle(hello(Some(("C1", "S1"))))
        else {
            panic!("expected Identify");
        };
        assert_eq!(
            identify.authentication.as_deref(),
            Some("QEGmCqovyIwn6lokAdMdtTuTcCHHn1NkJB06rZNPXh4=")
        );
        assert_eq!(identify.rpc_version, RPC_VERSION);
        assert_eq!(machine.state(), ConnectionState::AwaitingIdentified);

        let Step::Identified(identification) = machine.handle(identified()) else {
            panic!("expected Identified");
        };
        assert_eq!(identification.negotiated_rpc_version, 1);
        assert_eq!(identification.obs_web_socket_version.as_deref(), Some("5.5.4"));
        assert!(machine.state().is_identified());
    }

    #[test]
    fn handshake_without_authentication_sends_no_auth_field() {
        let mut machine = open(Some("ignored"));
        let Step::SendIdentify(OutgoingMessage::Identify(identify)) = machine.handle(hello(None))
        else {
            panic!("expected Identify");
        };
        assert_eq!(identify.authentication, None);
    }

    #[test]
    fn out_of_order_handshake_is_a_violation() {
        let mut machine = open(None);
        assert!(matches!(
            machine.handle(identified()),
            Step::Violation(Error::Handshake { .. })
        ));

        let mut machine = identified_machine();
        assert!(matches!(
            machine.handle(hello(None)),
            Step::Violation(Error::Handshake { .. })
        ));
        assert!(matches!(
            machine.handle(identified()),
            Step::Violation(Error::Handshake { .. })
        ));
    }

    #[test]
    fn requests_before_identified_are_refused() {
        let mut machine = open(None);
        let (err, slot) = machine
            .request("GetVersion", None, TestSlot::tagged("early"))
            .unwrap_err();
        assert!(matches!(err, Error::NotIdentified));
        assert_eq!(slot.tag, "early");
        assert_eq!(machine.pending_count(), 0);

        machine.handle(hello(None));
        assert!(machine.request("GetVersion", None, TestSlot::default()).is_err());
        assert!(machine.reidentify(Some(0), TestSlot::default()).is_err());
    }

    #[test]
    fn undecodable_response_releases_its_request() {
        let mut machine = identified_machine();
        let id = request_id(
            &machine
                .request("GetVersion", None, TestSlot::tagged("broken"))
                .unwrap(),
        );
        assert_eq!(machine.take_undecodable(&id).map(|slot| slot.tag), Some("broken"));
        assert_eq!(machine.pending_count(), 0);
        assert!(machine.take_undecodable(&id).is_none());
        assert!(machine.state().is_identified());
    }

    #[test]
    fn responses_correlate_by_request_id() {
        let mut machine = identified_machine();
        let first = request_id(
            &machine
                .request("GetVersion", None, TestSlot::tagged("first"))
                .unwrap(),
        );
        let second = request_id(
            &machine
                .request("GetStats", Some(json!({})), TestSlot::tagged("second"))
                .unwrap(),
        );
        assert_ne!(first, second);
        assert_eq!(machine.pending_count(), 2);

        let Step::Response { pending, result } =
            machine.handle(response(&second, RequestStatus::success(), Some(json!(2))))
        else {
            panic!("expected a response");
        };
        assert_eq!(pending.slot.tag, "second");
        assert_eq!(pending.request_type, "GetStats");
        assert_eq!(result.unwrap(), Some(json!(2)));

        let Step::Response { pending, result } =
            machine.handle(response(&first, RequestStatus::success(), Some(json!(1))))
        else {
            panic!("expected a response");
        };
        assert_eq!(pending.slot.tag, "first");
        assert_eq!(result.unwrap(), Some(json!(1)));
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn failing_status_becomes_request_error() {
        let mut machine = identified_machine();
        let id = request_id(
            &machine
                .request("StartReplayBuffer", None, TestSlot::default())
                .unwrap(),
        );
        let step = machine.handle(response(
            &id,
            RequestStatus::failure(status::OUTPUT_RUNNING, Some("already active")),
            None,
        ));
        let Step::Response { result, .. } = step else {
            panic!("expected a response");
        };
        match result.unwrap_err() {
            Error::Request {
                request_id,
                code,
                comment,
                ..
            } => {
                assert_eq!(request_id, id);
                assert_eq!(code, 500);
                assert_eq!(comment.as_deref(), Some("already active"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(machine.state().is_identified());
    }

    #[test]
    fn unknown_and_abandoned_responses_are_ignored() {
        let mut machine = identified_machine();
        assert!(matches!(
            machine.handle(response("ffffffffffffffff", RequestStatus::success(), None)),
            Step::Ignore
        ));

        let slot = TestSlot::default();
        let abandoned = slot.abandoned.clone();
        let id = request_id(&machine.request("GetVersion", None, slot).unwrap());
        abandoned.set(true);
        assert!(matches!(
            machine.handle(response(&id, RequestStatus::success(), None)),
            Step::Ignore
        ));
        assert_eq!(machine.pending_count(), 0);
    }

    #[test]
    fn abandoned_requests_are_pruned_on_next_request() {
        let mut machine = identified_machine();
        let slot = TestSlot::default();
        let abandoned = slot.abandoned.clone();
        machine.request("GetVersion", None, slot).unwrap();
        abandoned.set(true);
        machine.request("GetVersion", None, TestSlot::default()).unwrap();
        assert_eq!(machine.pending_count(), 1);
    }

    #[test]
    fn request_ids_skip_pending_collisions() {
        let mut table = PendingTable::<TestSlot>::new();
        let first = table.insert(TestSlot::default(), "A");
        table.next_id = 0;
        let second = table.insert(TestSlot::default(), "B");
        assert_eq!(first, "0000000000000000");
        assert_eq!(second, "0000000000000001");
    }

    #[test]
    fn batch_shares_the_pending_table() {
        let mut machine = identified_machine();
        let message = machine
            .request_batch(
                vec![BatchRequest::new("GetVersion", None)],
                Some(false),
                None,
                TestSlot::tagged("batch"),
            )
            .unwrap();
        let id = request_id(&message);
        let step = machine.handle(IncomingMessage::RequestBatchResponse(m::RequestBatchResponse {
            request_id: id,
            results: vec![m::BatchResult {
                request_type: "GetVersion".into(),
                request_id: None,
                request_status: RequestStatus::failure(status::NOT_READY, None),
                response_data: None,
            }],
        }));
        let Step::BatchResponse { pending, results } = step else {
            panic!("expected a batch response");
        };
        assert_eq!(pending.slot.tag, "batch");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn reidentify_accepts_a_second_identified() {
        let mut machine = identified_machine();
        let message = machine
            .reidentify(Some(m::event_subscription::NONE), TestSlot::tagged("re"))
            .unwrap();
        assert!(matches!(message, OutgoingMessage::Reidentify(_)));
        let Step::Reidentified { slot, .. } = machine.handle(identified()) else {
            panic!("expected Reidentified");
        };
        assert_eq!(slot.tag, "re");
        assert!(machine.state().is_identified());
    }

    #[test]
    fn events_and_unknown_opcodes() {
        let mut machine = identified_machine();
        let step = machine.handle(IncomingMessage::Event(Event {
            event_type: "SomethingNobodyListensTo".into(),
            event_intent: 0,
            event_data: None,
        }));
        assert!(matches!(step, Step::Event(_)));
        let step = machine.handle(IncomingMessage::Unrecognized {
            op: 99,
            d: Value::Null,
        });
        assert!(matches!(step, Step::Ignore));
    }

    #[test]
    fn closing_hands_back_every_waiting_slot() {
        let mut machine = identified_machine();
        machine.request("A", None, TestSlot::tagged("a")).unwrap();
        machine.request("B", None, TestSlot::tagged("b")).unwrap();
        machine.reidentify(None, TestSlot::tagged("c")).unwrap();
        machine.begin_close();
        assert_eq!(machine.state(), ConnectionState::Closing);
        let mut tags: Vec<_> = machine.closed().into_iter().map(|slot| slot.tag).collect();
        tags.sort();
        assert_eq!(tags, ["a", "b", "c"]);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.state().is_identified());
        assert_eq!(machine.pending_count(), 0);
    }
}
